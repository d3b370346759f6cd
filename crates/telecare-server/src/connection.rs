//! WebSocket connection lifecycle.
//!
//! Each upgraded socket gets a bounded outbound queue drained by a writer
//! task, and a read loop that hands every text frame to the [`Relay`] in
//! arrival order. When the read loop ends the socket is unbound from the
//! registry; a binding that was already taken over by a newer socket for
//! the same user is left untouched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use telecare_shared::constants::{ERR_FRAME_TOO_LARGE, ERR_INVALID_FORMAT, ERR_RATE_LIMITED};
use telecare_shared::protocol::ServerEnvelope;

use crate::api::AppState;
use crate::error::ServerError;
use crate::rate_limit::FrameLimiter;
use crate::registry::ConnectionHandle;

/// Tungstenite's own hard limit, above the application frame limit so a
/// moderately oversized frame gets an error envelope. Past this the socket is
/// closed by the transport.
const TRANSPORT_LIMIT_FACTOR: usize = 4;

/// Holds one slot of the connection budget; released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        if max > 0 && previous >= max {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let slot = ConnectionSlot::acquire(&state.connections, state.config.max_connections)
        .ok_or_else(|| {
            warn!(
                max = state.config.max_connections,
                "Connection limit reached, refusing upgrade"
            );
            ServerError::Unavailable("too many connections".into())
        })?;

    let transport_limit = state
        .config
        .max_frame_bytes
        .saturating_mul(TRANSPORT_LIMIT_FACTOR);

    Ok(ws
        .max_message_size(transport_limit)
        .on_upgrade(move |socket| handle_socket(socket, state, slot)))
}

async fn handle_socket(socket: WebSocket, state: AppState, _slot: ConnectionSlot) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.outbound_queue);
    let conn = ConnectionHandle::new(tx);
    let conn_id = conn.id();

    info!(conn = %conn_id, "Socket connected");

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut limiter = FrameLimiter::new(state.config.frame_rate, state.config.frame_burst);
    let max_frame = state.config.max_frame_bytes;

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!(conn = %conn_id, error = %e, "Socket read failed");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if !limiter.check() {
                    conn.send_envelope(&ServerEnvelope::error(ERR_RATE_LIMITED));
                    continue;
                }
                if text.len() > max_frame {
                    debug!(conn = %conn_id, len = text.len(), "Frame over size limit");
                    conn.send_envelope(&ServerEnvelope::error(ERR_FRAME_TOO_LARGE));
                    continue;
                }
                state.relay.handle_frame(&conn, &text).await;
            }
            Message::Binary(_) => {
                conn.send_envelope(&ServerEnvelope::error(ERR_INVALID_FORMAT));
            }
            Message::Close(_) => break,
            // Pings are answered by the transport.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if let Some(user) = state.registry.unbind(conn_id).await {
        info!(conn = %conn_id, user = %user, "User went offline");
    }
    drop(conn);
    writer.abort();
    info!(conn = %conn_id, "Socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_respect_limit_and_release_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));

        let a = ConnectionSlot::acquire(&counter, 2).unwrap();
        let b = ConnectionSlot::acquire(&counter, 2).unwrap();
        assert!(ConnectionSlot::acquire(&counter, 2).is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        drop(a);
        let c = ConnectionSlot::acquire(&counter, 2);
        assert!(c.is_some());

        drop(b);
        drop(c);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_means_unlimited() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slots: Vec<_> = (0..100)
            .map(|_| ConnectionSlot::acquire(&counter, 0).unwrap())
            .collect();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        drop(slots);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
