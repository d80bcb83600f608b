pub mod jid;
pub mod stanza;
pub mod stream_id;
pub mod xml;

pub use jid::Jid;
