//! Envelope dispatch.
//!
//! Every inbound text frame is parsed once into a [`ClientEnvelope`] and
//! routed by variant: `auth` binds the socket, `chat` goes through the chat
//! relay, signaling variants go through the signaling relay. Anything that
//! fails to parse is answered with an `error` envelope on the same socket and
//! the connection stays open.

pub mod chat;
pub mod signaling;

use std::sync::Arc;

use tracing::debug;

use telecare_shared::protocol::{
    ClientEnvelope, IceCandidate, ServerEnvelope, VideoAnswer, VideoOffer,
};
use telecare_store::ChatStore;

use crate::registry::{ConnectionHandle, Registry};

#[derive(Clone)]
pub struct Relay {
    registry: Registry,
    store: Arc<dyn ChatStore>,
}

impl Relay {
    pub fn new(registry: Registry, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle one frame from `conn` to completion.
    pub async fn handle_frame(&self, conn: &ConnectionHandle, text: &str) {
        let envelope = match ClientEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "Rejecting malformed frame");
                conn.send_envelope(&ServerEnvelope::error(e.client_message()));
                return;
            }
        };

        let kind = envelope.kind();
        match envelope {
            ClientEnvelope::Auth(auth) => {
                self.registry.bind(auth.user_id, conn.clone()).await;
            }
            ClientEnvelope::Chat(request) => {
                if let Err(e) = chat::relay_chat(&self.registry, &self.store, conn, request).await {
                    debug!(conn = %conn.id(), error = %e, "Chat rejected");
                    conn.send_envelope(&ServerEnvelope::error(e.client_message()));
                }
            }
            ClientEnvelope::VideoOffer(VideoOffer { target_user_id, .. })
            | ClientEnvelope::VideoAnswer(VideoAnswer { target_user_id, .. })
            | ClientEnvelope::IceCandidate(IceCandidate { target_user_id, .. }) => {
                signaling::forward(&self.registry, kind, target_user_id, text).await;
            }
        }
    }
}
