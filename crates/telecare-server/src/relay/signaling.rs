//! Signaling relay: address-based forwarding of WebRTC negotiation frames.
//!
//! The relay never looks inside an offer, answer or candidate. It forwards
//! the exact text it received to the bound target socket, or drops it
//! silently when the target is not bound. Nothing is persisted.

use tracing::debug;

use telecare_shared::types::UserId;

use crate::registry::Registry;

/// Forward `raw` to `target`. Returns whether the frame was queued.
pub async fn forward(registry: &Registry, kind: &'static str, target: UserId, raw: &str) -> bool {
    match registry.lookup(target).await {
        Some(conn) if conn.is_open() => {
            debug!(kind, to = %target, conn = %conn.id(), "Forwarding signaling frame");
            conn.send_text(raw.to_owned())
        }
        _ => {
            debug!(kind, to = %target, "Signaling target offline, dropping frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use telecare_store::{ChatStore, SqliteChatStore};
    use tokio::sync::mpsc;

    use crate::registry::{ConnectionHandle, Registry};
    use crate::relay::Relay;

    use super::*;

    fn socket() -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionHandle::new(tx), rx)
    }

    fn relay() -> Relay {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::open_in_memory().unwrap());
        Relay::new(Registry::spawn(), store)
    }

    #[tokio::test]
    async fn offer_reaches_target_byte_for_byte() {
        let relay = relay();
        let (alice, mut alice_rx) = socket();
        let (bob, mut bob_rx) = socket();
        relay.handle_frame(&alice, r#"{"type":"auth","userId":1}"#).await;
        relay.handle_frame(&bob, r#"{"type":"auth","userId":2}"#).await;

        // Odd spacing and key order must survive untouched.
        let offer = r#"{ "type":"video_offer", "fromUserName":"A",
            "offer":{"sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0","type":"offer"},
            "targetUserId":2, "fromUserId":1, "extra":[1,2,3] }"#;
        relay.handle_frame(&alice, offer).await;

        assert_eq!(bob_rx.try_recv().unwrap(), offer);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn answer_and_candidates_are_forwarded() {
        let relay = relay();
        let (alice, mut alice_rx) = socket();
        let (bob, _bob_rx) = socket();
        relay.handle_frame(&alice, r#"{"type":"auth","userId":1}"#).await;
        relay.handle_frame(&bob, r#"{"type":"auth","userId":2}"#).await;

        let answer = r#"{"type":"video_answer","answer":{"type":"answer","sdp":"x"},"targetUserId":1,"fromUserId":2,"fromUserName":"Dr B"}"#;
        let candidate = r#"{"type":"ice_candidate","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0},"targetUserId":1}"#;
        relay.handle_frame(&bob, answer).await;
        relay.handle_frame(&bob, candidate).await;

        assert_eq!(alice_rx.try_recv().unwrap(), answer);
        assert_eq!(alice_rx.try_recv().unwrap(), candidate);
    }

    #[tokio::test]
    async fn unbound_target_drops_silently() {
        let relay = relay();
        let (alice, mut alice_rx) = socket();
        relay.handle_frame(&alice, r#"{"type":"auth","userId":1}"#).await;

        let candidate = r#"{"type":"ice_candidate","candidate":{"candidate":"c"},"targetUserId":99}"#;
        relay.handle_frame(&alice, candidate).await;

        assert!(alice_rx.try_recv().is_err(), "no error goes back to the sender");
        assert!(!forward(relay.registry(), "ice_candidate", UserId(99), candidate).await);
    }

    #[tokio::test]
    async fn forward_to_closed_socket_is_a_drop() {
        let registry = Registry::spawn();
        let (bob, bob_rx) = socket();
        registry.bind(UserId(2), bob).await;
        drop(bob_rx);

        assert!(!forward(&registry, "video_offer", UserId(2), "{}").await);
    }
}
