use std::pin::Pin;
use std::task::{ready, Context, Poll};

use anyhow::{anyhow, Error};
use bytes::BytesMut;
use rustyxml::{Element as RustyXmlElement, ElementBuilder, Event, Parser, Xml};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_stream::Stream;

use crate::xml::stream_parser::{Frame, StanzaTooLarge, StreamHeader, MAX_STANZA_BYTES};
use crate::xml::{Element, Node};

fn valid_stream_tag(name: &str, namespace: &Option<String>) -> bool {
    name == "stream" && namespace.as_deref() == Some(crate::xml::namespaces::JABBER_STREAMS)
}

fn convert_xml(node: Xml) -> Option<Node> {
    match node {
        Xml::ElementNode(el) => Some(Node::Element(convert_element(el))),
        Xml::CharacterNode(text) => Some(Node::Text(text)),
        Xml::CDATANode(text) => Some(Node::CData(text)),
        Xml::CommentNode(text) => Some(Node::Comment(text)),
        Xml::PINode(text) => Some(Node::ProcessingInstruction(text)),
    }
}

fn convert_element(element: RustyXmlElement) -> Element {
    Element {
        name: element.name,
        namespace: element.ns,
        attributes: element.attributes,
        children: element.children.into_iter().filter_map(convert_xml).collect(),
    }
}

/// Pulls [`Frame`]s out of a byte stream using the `rustyxml` tokenizer.
///
/// `rustyxml`'s `Parser` is a pull-style, non-blocking tokenizer: feeding it
/// a chunk of bytes and then iterating it yields every event that chunk
/// completed. We drive that iterator, forward whole elements to an
/// `ElementBuilder`, and read more bytes from the underlying socket only
/// once the parser has nothing further to yield.
pub struct StreamParser<R: AsyncRead + Unpin> {
    reader: R,
    buffer: BytesMut,
    parser: Parser,
    element_builder: ElementBuilder,
    pending_bytes: usize,
}

impl<R: AsyncRead + Unpin> super::StreamParser<R> for StreamParser<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(4096),
            parser: Parser::new(),
            element_builder: ElementBuilder::new(),
            pending_bytes: 0,
        }
    }

    fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin> Stream for StreamParser<R> {
    type Item = Result<Frame, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            for parser_result in &mut this.parser {
                match parser_result {
                    Ok(Event::ElementStart(tag)) if valid_stream_tag(&tag.name, &tag.ns) => {
                        let header = StreamHeader {
                            from: tag
                                .attributes
                                .get(&("from".to_string(), None))
                                .and_then(|jid| jid.parse().ok()),
                            to: tag
                                .attributes
                                .get(&("to".to_string(), None))
                                .and_then(|jid| jid.parse().ok()),
                            id: None,
                            language: tag
                                .attributes
                                .get(&("lang".to_string(), Some(crate::xml::namespaces::XML.to_string())))
                                .cloned(),
                        };
                        this.pending_bytes = 0;
                        return Poll::Ready(Some(Ok(Frame::StreamStart(header))));
                    }
                    Ok(Event::ElementEnd(tag)) if valid_stream_tag(&tag.name, &tag.ns) => {
                        this.pending_bytes = 0;
                        return Poll::Ready(Some(Ok(Frame::StreamEnd)));
                    }
                    Err(err) => {
                        return Poll::Ready(Some(Err(anyhow!(err))));
                    }
                    Ok(_) => {}
                }

                if let Some(builder_result) = this.element_builder.handle_event(parser_result) {
                    this.pending_bytes = 0;
                    let frame_result = match builder_result {
                        Ok(element) => Ok(Frame::XmlFragment(convert_element(element))),
                        Err(err) => Err(anyhow!(err)),
                    };
                    return Poll::Ready(Some(frame_result));
                }
            }

            this.buffer.resize(4096, 0);
            let mut read_buf = ReadBuf::new(&mut this.buffer);
            ready!(Pin::new(&mut this.reader).poll_read(cx, &mut read_buf))?;
            let bytes_read = read_buf.filled().len();

            if bytes_read == 0 {
                return Poll::Ready(None);
            }

            this.pending_bytes += bytes_read;
            if this.pending_bytes > MAX_STANZA_BYTES {
                return Poll::Ready(Some(Err(anyhow::Error::new(StanzaTooLarge {
                    limit: MAX_STANZA_BYTES,
                }))));
            }

            match std::str::from_utf8(read_buf.filled()) {
                Ok(str) => {
                    this.parser.feed_str(str);
                }
                Err(err) => {
                    return Poll::Ready(Some(Err(anyhow!(err))));
                }
            }

            this.buffer.clear();
        }
    }
}
