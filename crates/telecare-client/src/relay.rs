//! WebSocket connection to the relay.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use telecare_shared::protocol::{AuthRequest, ChatRequest, ClientEnvelope, ServerEnvelope};
use telecare_shared::types::UserId;

use crate::error::ClientError;

const OUTBOUND_DEPTH: usize = 64;
const INBOUND_DEPTH: usize = 256;

/// Sending half of a relay connection. Cheap to clone; the socket closes
/// once every clone is dropped.
#[derive(Debug, Clone)]
pub struct RelayClient {
    user_id: UserId,
    outbound: mpsc::Sender<String>,
}

impl RelayClient {
    /// Connect to `url` (e.g. `ws://host:8080/ws`) and authenticate as
    /// `user_id`. Returns the client and the stream of envelopes the relay
    /// sends; the stream ends when the socket closes.
    pub async fn connect(
        url: &str,
        user_id: UserId,
    ) -> Result<(Self, mpsc::Receiver<ServerEnvelope>), ClientError> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let auth = ClientEnvelope::Auth(AuthRequest { user_id }).to_json()?;
        sink.send(Message::Text(auth)).await?;
        info!(url, user = %user_id, "Connected to relay");

        let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEnvelope>(INBOUND_DEPTH);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "Relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "Relay read failed");
                        break;
                    }
                };
                match ServerEnvelope::parse(&text) {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Ignoring unparseable relay frame"),
                }
            }
            debug!("Relay reader stopped");
        });

        Ok((Self { user_id, outbound }, inbound_rx))
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub async fn send(&self, envelope: &ClientEnvelope) -> Result<(), ClientError> {
        let text = envelope.to_json()?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub async fn send_chat(
        &self,
        receiver: UserId,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientEnvelope::Chat(ChatRequest::new(
            self.user_id,
            receiver,
            content,
        )))
        .await
    }
}
