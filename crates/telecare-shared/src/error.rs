use thiserror::Error;

use crate::constants::{ERR_EMPTY_CONTENT, ERR_INVALID_FORMAT, ERR_MISSING_PARTICIPANTS};

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Not JSON, unknown `type` tag, or a known tag with ill-typed fields.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Chat envelope missing senderId or receiverId")]
    MissingParticipants,

    #[error("Chat envelope has empty content")]
    EmptyContent,
}

impl ProtocolError {
    /// Text sent back to the originating socket in an `error` envelope.
    pub fn client_message(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => ERR_INVALID_FORMAT,
            ProtocolError::MissingParticipants => ERR_MISSING_PARTICIPANTS,
            ProtocolError::EmptyContent => ERR_EMPTY_CONTENT,
        }
    }
}
