use telecare_media::{CallNotice, CallState};
use telecare_shared::protocol::ChatMessage;
use telecare_shared::types::UserId;

/// Everything the UI layer needs to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A message addressed to this user
    ChatReceived(ChatMessage),
    /// The relay persisted a message this user sent
    ChatSent(ChatMessage),
    /// `error` envelope from the relay
    RelayError(String),
    IncomingCall { from: UserId, name: String },
    CallStateChanged(CallState),
    MediaState { is_muted: bool, is_video_enabled: bool },
    /// User-visible failure or timeout
    Notice(CallNotice),
    Disconnected,
}
