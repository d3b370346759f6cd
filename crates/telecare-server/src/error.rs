use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use telecare_shared::constants::ERR_SEND_FAILED;
use telecare_shared::ProtocolError;
use telecare_store::StoreError;

/// Failures on the HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(e) => {
                tracing::error!(error = %e, "Store failure while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            ServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Failures while dispatching one envelope. Rendered to the originating
/// socket as an `error` envelope; never fatal to the connection.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RelayError {
    pub fn client_message(&self) -> &'static str {
        match self {
            RelayError::Protocol(e) => e.client_message(),
            RelayError::Persistence(_) | RelayError::Task(_) => ERR_SEND_FAILED,
        }
    }
}
