//! Chat relay: validate, persist, forward, acknowledge.
//!
//! A message is written to the store before anything is sent. If the
//! receiver is bound it gets a `chat` envelope carrying the persisted row;
//! the sender always gets `chat_sent` with the same row, online receiver or
//! not. Offline receivers pick the message up later through the history
//! endpoint; nothing is replayed over the socket.

use std::sync::Arc;

use tracing::{debug, info};

use telecare_shared::protocol::{ChatMessage, ChatRequest, ServerEnvelope, ValidChat};
use telecare_store::ChatStore;

use crate::error::RelayError;
use crate::registry::{ConnectionHandle, Registry};

/// Relay one chat request from `sender`.
///
/// Validation happens inline. Persistence and delivery run on a spawned task
/// that is awaited, so a sender disconnecting mid-write does not cancel an
/// accepted message.
pub async fn relay_chat(
    registry: &Registry,
    store: &Arc<dyn ChatStore>,
    sender: &ConnectionHandle,
    request: ChatRequest,
) -> Result<ChatMessage, RelayError> {
    let chat = request.validate()?;

    let registry = registry.clone();
    let store = store.clone();
    let sender = sender.clone();
    tokio::spawn(async move { deliver(&registry, store, &sender, chat).await }).await?
}

async fn deliver(
    registry: &Registry,
    store: Arc<dyn ChatStore>,
    sender: &ConnectionHandle,
    chat: ValidChat,
) -> Result<ChatMessage, RelayError> {
    let message = tokio::task::spawn_blocking(move || {
        store.create_chat_message(chat.sender_id, chat.receiver_id, &chat.content)
    })
    .await??;

    info!(
        id = %message.id,
        from = %message.sender_id,
        to = %message.receiver_id,
        "Chat message persisted"
    );

    match registry.lookup(message.receiver_id).await {
        Some(receiver) if receiver.is_open() => {
            receiver.send_envelope(&ServerEnvelope::Chat {
                message: message.clone(),
            });
        }
        _ => {
            debug!(to = %message.receiver_id, "Receiver offline, message kept for later fetch");
        }
    }

    sender.send_envelope(&ServerEnvelope::ChatSent {
        message: message.clone(),
    });

    Ok(message)
}
