//! The per-connection XMPP stream engine: stream negotiation, SASL PLAIN
//! authentication, resource bind, and stanza dispatch (IQ/presence/message)
//! over the session registry.

mod bind;
pub mod engine;
mod iq;
mod message;

pub use engine::{handle_connection, EngineConfig, ServerIdentity, State, StreamEngine};
