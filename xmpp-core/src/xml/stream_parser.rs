use anyhow::Error;
use tokio::io::AsyncRead;
use tokio_stream::Stream;

use crate::jid::Jid;
use crate::xml::Element;

pub mod rusty_xml;

/// Maximum number of bytes buffered for a single not-yet-closed element,
/// measured from the byte after the enclosing `<stream:stream>` tag. A
/// peer that never closes an element is cut off rather than allowed to
/// grow the buffer without bound.
pub const MAX_STANZA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub id: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug)]
pub enum Frame {
    StreamStart(StreamHeader),
    XmlFragment(Element),
    StreamEnd,
}

/// Error raised when a single element exceeds [`MAX_STANZA_BYTES`] before
/// it closes. Callers map this to a `policy-violation` stream error.
#[derive(Debug, thiserror::Error)]
#[error("stanza exceeded {limit} bytes before closing")]
pub struct StanzaTooLarge {
    pub limit: usize,
}

pub trait StreamParser<R: AsyncRead + Unpin>: Stream<Item = Result<Frame, Error>> + Unpin {
    fn new(reader: R) -> Self;
    fn into_inner(self) -> R;
}
