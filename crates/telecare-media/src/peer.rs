//! Peer connection abstraction and the `webrtc` crate backend.
//!
//! Session descriptions and ICE candidates cross this boundary as
//! `serde_json::Value` in their browser shapes (`{"type","sdp"}` and
//! `RTCIceCandidateInit`), which is exactly what the relay forwards.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use crate::devices::LocalStream;
use crate::error::PeerError;

/// One side of a peer-to-peer media session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<(), PeerError>;

    /// Create an offer and apply it as the local description.
    async fn create_offer(&self) -> Result<Value, PeerError>;

    /// Create an answer and apply it as the local description.
    async fn create_answer(&self) -> Result<Value, PeerError>;

    async fn set_remote_description(&self, description: Value) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Creates peer connections. Locally gathered ICE candidates are pushed to
/// `candidates` as they trickle in.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        candidates: mpsc::UnboundedSender<Value>,
    ) -> Result<Box<dyn PeerConnection>, PeerError>;
}

#[derive(Debug, Clone, Default)]
pub struct IceConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        if self.urls.is_empty() {
            return Vec::new();
        }
        vec![RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }]
    }
}

/// [`PeerFactory`] producing [`WebRtcPeer`]s.
#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerFactory {
    ice: IceConfig,
}

impl WebRtcPeerFactory {
    pub fn new(ice: IceConfig) -> Self {
        Self { ice }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        candidates: mpsc::UnboundedSender<Value>,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        Ok(Box::new(WebRtcPeer::new(&self.ice, candidates).await?))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    /// Remote candidates received before the remote description.
    pending: Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcPeer {
    pub async fn new(
        ice: &IceConfig,
        candidates: mpsc::UnboundedSender<Value>,
    ) -> Result<Self, PeerError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: ice.ice_servers(),
                ..Default::default()
            })
            .await?,
        );

        pc.on_ice_candidate(Box::new(move |candidate| {
            let candidates = candidates.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_value(&init) {
                        Ok(value) => {
                            let _ = candidates.send(value);
                        }
                        Err(e) => warn!(error = %e, "Failed to encode local candidate"),
                    },
                    Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            info!(state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Apply candidates buffered before the remote description. A rejected
    /// candidate is skipped; it does not fail the description that was
    /// already applied.
    async fn flush_pending(&self) {
        let buffered = std::mem::take(&mut *self.pending.lock().await);
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "Applying buffered ICE candidates");
        }
        for candidate in buffered {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!(error = %e, "Skipping buffered ICE candidate");
            }
        }
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<(), PeerError> {
        for track in stream.tracks() {
            if let Some(rtp) = track.rtp_track() {
                self.pc
                    .add_track(rtp as Arc<dyn TrackLocal + Send + Sync>)
                    .await?;
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<Value, PeerError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(serde_json::to_value(&offer)?)
    }

    async fn create_answer(&self) -> Result<Value, PeerError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(serde_json::to_value(&answer)?)
    }

    async fn set_remote_description(&self, description: Value) -> Result<(), PeerError> {
        let description: RTCSessionDescription = serde_json::from_value(description)?;
        self.pc.set_remote_description(description).await?;
        self.flush_pending().await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), PeerError> {
        let candidate: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        if self.pc.remote_description().await.is_none() {
            self.pending.lock().await.push(candidate);
            return Ok(());
        }
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{MediaConstraints, MediaDevices, WebRtcDevices};

    #[tokio::test]
    async fn offer_answer_between_two_local_peers() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let factory = WebRtcPeerFactory::default();
        let caller = factory.create(tx_a).await.unwrap();
        let callee = factory.create(tx_b).await.unwrap();

        let devices = WebRtcDevices::new("test");
        let stream = devices
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap();
        caller.add_local_stream(&stream).await.unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer["type"], "offer");
        assert!(offer["sdp"].as_str().unwrap().contains("m=audio"));

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer["type"], "answer");
        caller.set_remote_description(answer).await.unwrap();

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn early_candidates_are_buffered() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = WebRtcPeer::new(&IceConfig::default(), tx).await.unwrap();

        let candidate = serde_json::json!({
            "candidate": "candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        peer.add_ice_candidate(candidate).await.unwrap();
        assert_eq!(peer.pending.lock().await.len(), 1);
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn bad_buffered_candidate_does_not_fail_the_offer() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let caller = WebRtcPeer::new(&IceConfig::default(), tx_a).await.unwrap();
        let callee = WebRtcPeer::new(&IceConfig::default(), tx_b).await.unwrap();

        let stream = WebRtcDevices::new("test")
            .get_user_media(&MediaConstraints::audio_only())
            .await
            .unwrap();
        caller.add_local_stream(&stream).await.unwrap();
        let offer = caller.create_offer().await.unwrap();

        callee
            .add_ice_candidate(serde_json::json!({"candidate": "candidate:garbage"}))
            .await
            .unwrap();
        callee.set_remote_description(offer).await.unwrap();
        assert!(callee.pending.lock().await.is_empty());
        assert!(callee.create_answer().await.is_ok());

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn garbage_description_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = WebRtcPeer::new(&IceConfig::default(), tx).await.unwrap();
        let err = peer
            .set_remote_description(serde_json::json!({"nope": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Payload(_)));
    }
}
