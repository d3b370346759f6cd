//! # telecare-client
//!
//! Client half of the Telecare relay protocol: a WebSocket [`RelayClient`]
//! that authenticates on connect, an HTTP [`HistoryClient`] for chat history
//! and read state, and a [`CallController`] that feeds incoming signaling
//! into a [`telecare_media::CallSession`].

pub mod call;
pub mod error;
pub mod events;
pub mod history;
pub mod relay;


pub use call::{CallCommand, CallController};
pub use error::ClientError;
pub use events::ClientEvent;
pub use history::{HistoryClient, ServerInfo};
pub use relay::RelayClient;
