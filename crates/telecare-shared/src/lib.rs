//! # telecare-shared
//!
//! Types shared by the signaling relay, the chat store and the client:
//! user identifiers, the JSON envelope protocol spoken over the relay
//! WebSocket, and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::{MessageId, UserId};
