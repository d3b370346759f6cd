use thiserror::Error;

/// Failures acquiring local media.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No audio or video requested")]
    NothingRequested,

    #[error("No {0} device available")]
    NoDevice(&'static str),

    #[error("Permission to use {0} was denied")]
    PermissionDenied(&'static str),

    #[error("Media device error: {0}")]
    Device(String),
}

/// Failures from the peer-connection backend.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Invalid session description or candidate: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Peer connection rejected: {0}")]
    Rejected(String),

    #[error("Peer connection is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Media acquisition failed: {0}")]
    Media(#[from] MediaError),

    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] PeerError),

    #[error("A call is already in progress")]
    Busy,

    #[error("No active call")]
    NoActiveCall,

    #[error("Unexpected {0} in the current call state")]
    Unexpected(&'static str),
}
