//! Envelope protocol spoken over the relay WebSocket.
//!
//! Every frame is one UTF-8 JSON object tagged by `type`. Inbound frames
//! (client to relay) deserialize into [`ClientEnvelope`]; everything the relay
//! emits is a [`ServerEnvelope`]. Signaling variants have the same shape in
//! both directions because the relay forwards them untouched.
//!
//! Unknown tags are rejected here, at deserialization, and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{MessageId, UserId};

/// Frames a client may send to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Binds the sending socket to a user identity
    Auth(AuthRequest),

    /// Chat message to persist and relay
    Chat(ChatRequest),

    /// WebRTC signaling, forwarded verbatim to `targetUserId`
    VideoOffer(VideoOffer),
    VideoAnswer(VideoAnswer),
    IceCandidate(IceCandidate),
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// A persisted message addressed to this client
    Chat { message: ChatMessage },

    /// Acknowledgment to the sender once the message is persisted
    ChatSent { message: ChatMessage },

    VideoOffer(VideoOffer),
    VideoAnswer(VideoAnswer),
    IceCandidate(IceCandidate),

    /// Locally recoverable failure; the connection stays open
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub user_id: UserId,
}

/// Inbound chat payload. Fields are optional so that a missing participant
/// is reported as a validation failure rather than a format error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A chat request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidChat {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
}

impl ChatRequest {
    pub fn new(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            sender_id: Some(sender_id),
            receiver_id: Some(receiver_id),
            content: Some(content.into()),
        }
    }

    /// Both participants present and content non-blank after trimming.
    /// Content is kept as sent.
    pub fn validate(self) -> Result<ValidChat, ProtocolError> {
        let (Some(sender_id), Some(receiver_id)) = (self.sender_id, self.receiver_id) else {
            return Err(ProtocolError::MissingParticipants);
        };
        let content = self.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProtocolError::EmptyContent);
        }
        Ok(ValidChat {
            sender_id,
            receiver_id,
            content,
        })
    }
}

/// SDP offer. `offer` is opaque to the relay (an `RTCSessionDescriptionInit`
/// as produced by the caller's peer connection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOffer {
    pub offer: Value,
    pub target_user_id: UserId,
    pub from_user_id: UserId,
    #[serde(default)]
    pub from_user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnswer {
    pub answer: Value,
    pub target_user_id: UserId,
    pub from_user_id: UserId,
    #[serde(default)]
    pub from_user_name: String,
}

/// Trickled ICE candidate (`RTCIceCandidateInit`), opaque to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: Value,
    pub target_user_id: UserId,
}

/// A persisted chat message as it appears on the wire and in history
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// Assigned by the store when the row is written
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

impl ClientEnvelope {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Recipient named by the envelope itself. `None` for `auth`, and for a
    /// chat request that has not been validated yet.
    pub fn target(&self) -> Option<UserId> {
        match self {
            ClientEnvelope::Auth(_) => None,
            ClientEnvelope::Chat(req) => req.receiver_id,
            ClientEnvelope::VideoOffer(o) => Some(o.target_user_id),
            ClientEnvelope::VideoAnswer(a) => Some(a.target_user_id),
            ClientEnvelope::IceCandidate(c) => Some(c.target_user_id),
        }
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::Auth(_) => "auth",
            ClientEnvelope::Chat(_) => "chat",
            ClientEnvelope::VideoOffer(_) => "video_offer",
            ClientEnvelope::VideoAnswer(_) => "video_answer",
            ClientEnvelope::IceCandidate(_) => "ice_candidate",
        }
    }
}

impl ServerEnvelope {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEnvelope::Error {
            message: message.into(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
