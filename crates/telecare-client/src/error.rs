use thiserror::Error;

use telecare_media::CallError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded {0}")]
    Status(reqwest::StatusCode),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Relay connection closed")]
    Closed,

    #[error(transparent)]
    Call(#[from] CallError),
}
