//! Client-side call session: the state machine for one peer-to-peer call.
//!
//! ```text
//!   Idle --start_call--> Connecting --handle_answer--> Active
//!   Idle --handle_offer--> Ringing ------------------> Active
//!   any  --hang_up--> Ended --reset--> Idle
//! ```
//!
//! Methods that produce signaling return the [`ClientEnvelope`] to send; the
//! session never touches the network itself. Media or negotiation failures
//! tear the attempt down to `Idle` before the error is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use telecare_shared::constants::DEFAULT_SIGNALING_TTL_SECS;
use telecare_shared::protocol::{ClientEnvelope, IceCandidate, VideoAnswer, VideoOffer};
use telecare_shared::types::UserId;

use crate::devices::{LocalStream, MediaConstraints, MediaDevices, MediaKind};
use crate::error::{CallError, MediaError, PeerError};
use crate::peer::{PeerConnection, PeerFactory};

/// Candidates arriving this soon after a call ended belong to that call.
const LATE_CANDIDATE_WINDOW: Duration = Duration::from_secs(5);

/// A peer created by a stray candidate is closed if no offer follows.
const PROVISIONAL_PEER_TTL: Duration = Duration::from_secs(DEFAULT_SIGNALING_TTL_SECS);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Caller waiting for an answer
    Connecting,
    /// Callee applying a received offer
    Ringing,
    Active,
    Ended,
}

/// User-facing message describing why a call attempt stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNotice {
    pub message: String,
}

impl CallNotice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn no_answer() -> Self {
        Self::new("No answer. You can send a chat message or schedule the consultation for later.")
    }
}

impl From<&CallError> for CallNotice {
    fn from(err: &CallError) -> Self {
        match err {
            CallError::Media(MediaError::PermissionDenied(_)) => {
                Self::new("Camera or microphone access was denied.")
            }
            CallError::Media(_) => Self::new("Could not access camera or microphone."),
            CallError::Negotiation(_) => Self::new("Could not establish the video connection."),
            CallError::Busy => Self::new("A call is already in progress."),
            CallError::NoActiveCall => Self::new("There is no active call."),
            CallError::Unexpected(_) => Self::new("The call could not continue."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub local_user: UserId,
    pub local_name: String,
    pub constraints: MediaConstraints,
    /// How long a caller stays in `Connecting`. `None` waits until hang-up.
    pub answer_timeout: Option<Duration>,
}

impl CallConfig {
    pub fn new(local_user: UserId, local_name: impl Into<String>) -> Self {
        Self {
            local_user,
            local_name: local_name.into(),
            constraints: MediaConstraints::default(),
            answer_timeout: Some(Duration::from_secs(DEFAULT_SIGNALING_TTL_SECS)),
        }
    }
}

pub struct CallSession {
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn PeerFactory>,

    state: CallState,
    state_tx: broadcast::Sender<CallState>,

    remote_user: Option<UserId>,
    stream: Option<LocalStream>,
    peer: Option<Box<dyn PeerConnection>>,
    stream_attached: bool,
    is_muted: bool,
    is_video_enabled: bool,
    is_call_initiator: bool,
    connecting_since: Option<Instant>,
    /// When the last call ended, to recognise its late candidates.
    ended_at: Option<Instant>,
    /// Set while the peer exists only because a candidate beat the offer.
    provisional_since: Option<Instant>,

    candidate_tx: mpsc::UnboundedSender<Value>,
    candidate_rx: mpsc::UnboundedReceiver<Value>,
}

impl CallSession {
    pub fn new(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn PeerFactory>,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(16);
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        Self {
            config,
            devices,
            factory,
            state: CallState::Idle,
            state_tx,
            remote_user: None,
            stream: None,
            peer: None,
            stream_attached: false,
            is_muted: false,
            is_video_enabled: true,
            is_call_initiator: false,
            connecting_since: None,
            ended_at: None,
            provisional_since: None,
            candidate_tx,
            candidate_rx,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Every transition, including the transient `Ended`.
    pub fn subscribe(&self) -> broadcast::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    pub fn remote_user(&self) -> Option<UserId> {
        self.remote_user
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_video_enabled(&self) -> bool {
        self.is_video_enabled
    }

    pub fn is_call_initiator(&self) -> bool {
        self.is_call_initiator
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Call state transition");
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    /// Caller path. Returns the `video_offer` to send.
    pub async fn start_call(&mut self, remote: UserId) -> Result<ClientEnvelope, CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::Busy);
        }

        if self.provisional_since.take().is_some() {
            debug!("Discarding peer created by a stray candidate");
            self.close_peer().await;
        }

        info!(to = %remote, "Starting call");
        self.remote_user = Some(remote);
        self.is_call_initiator = true;
        self.set_state(CallState::Connecting);

        let offer = match self.negotiate_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.abort(e).await),
        };

        self.connecting_since = Some(Instant::now());
        Ok(ClientEnvelope::VideoOffer(VideoOffer {
            offer,
            target_user_id: remote,
            from_user_id: self.config.local_user,
            from_user_name: self.config.local_name.clone(),
        }))
    }

    async fn negotiate_offer(&mut self) -> Result<Value, CallError> {
        self.ensure_media().await?;
        let peer = self.ensure_peer().await?;
        Ok(peer.create_offer().await?)
    }

    /// Callee path. Returns the `video_answer` to send.
    pub async fn handle_offer(&mut self, offer: VideoOffer) -> Result<ClientEnvelope, CallError> {
        if !matches!(self.state, CallState::Idle | CallState::Ringing) {
            warn!(from = %offer.from_user_id, "Offer received while busy");
            return Err(CallError::Busy);
        }

        info!(from = %offer.from_user_id, name = %offer.from_user_name, "Incoming call");
        self.provisional_since = None;
        self.remote_user = Some(offer.from_user_id);
        self.is_call_initiator = false;
        self.set_state(CallState::Ringing);

        let answer = match self.negotiate_answer(offer.offer).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.abort(e).await),
        };

        self.set_state(CallState::Active);
        Ok(ClientEnvelope::VideoAnswer(VideoAnswer {
            answer,
            target_user_id: offer.from_user_id,
            from_user_id: self.config.local_user,
            from_user_name: self.config.local_name.clone(),
        }))
    }

    async fn negotiate_answer(&mut self, offer: Value) -> Result<Value, CallError> {
        self.ensure_media().await?;
        let peer = self.ensure_peer().await?;
        peer.set_remote_description(offer).await?;
        Ok(peer.create_answer().await?)
    }

    /// Caller receives the callee's answer.
    pub async fn handle_answer(&mut self, answer: VideoAnswer) -> Result<(), CallError> {
        if self.state != CallState::Connecting || self.remote_user != Some(answer.from_user_id) {
            debug!(from = %answer.from_user_id, state = ?self.state, "Ignoring unexpected answer");
            return Err(CallError::Unexpected("answer"));
        }

        let applied = match &self.peer {
            Some(peer) => peer
                .set_remote_description(answer.answer)
                .await
                .map_err(CallError::from),
            None => Err(CallError::Negotiation(PeerError::Closed)),
        };
        if let Err(e) = applied {
            return Err(self.abort(e).await);
        }

        info!(with = %answer.from_user_id, "Call connected");
        self.connecting_since = None;
        self.set_state(CallState::Active);
        Ok(())
    }

    /// Apply a remote candidate in any state, creating the peer connection
    /// first if the candidate beat the offer here. Candidates trailing a call
    /// that just ended are dropped.
    pub async fn handle_ice_candidate(&mut self, candidate: Value) -> Result<(), CallError> {
        if self.peer.is_none() {
            if self.state == CallState::Idle && self.just_ended(Instant::now()) {
                debug!("Ignoring candidate for a call that already ended");
                return Ok(());
            }
            debug!("Candidate arrived before a peer connection, creating one");
            if self.state == CallState::Idle {
                self.provisional_since = Some(Instant::now());
            }
        }
        let peer = self.ensure_peer().await?;
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!(error = %e, "Failed to apply remote ICE candidate");
            return Err(e.into());
        }
        Ok(())
    }

    /// Local candidates gathered so far, as envelopes for the remote user.
    /// Candidates stay queued until the remote user is known.
    pub fn take_local_candidates(&mut self) -> Vec<ClientEnvelope> {
        let Some(target) = self.remote_user else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(candidate) = self.candidate_rx.try_recv() {
            out.push(ClientEnvelope::IceCandidate(IceCandidate {
                candidate,
                target_user_id: target,
            }));
        }
        out
    }

    /// Ends the call from any state and returns the session to `Idle`.
    /// Already idle, it only closes a stray peer and publishes nothing.
    pub async fn hang_up(&mut self) {
        if self.state == CallState::Idle {
            self.close_peer().await;
            return;
        }
        info!(with = ?self.remote_user.map(|u| u.get()), "Hanging up");
        self.teardown().await;
        self.ended_at = Some(Instant::now());
        self.set_state(CallState::Ended);
        self.reset();
    }

    /// `Ended` back to `Idle`, clearing per-call attributes.
    pub fn reset(&mut self) {
        self.remote_user = None;
        self.is_muted = false;
        self.is_video_enabled = true;
        self.is_call_initiator = false;
        self.connecting_since = None;
        self.provisional_since = None;
        while self.candidate_rx.try_recv().is_ok() {}
        self.set_state(CallState::Idle);
    }

    /// Ends a call still waiting for an answer past the configured timeout,
    /// and closes a stray peer no offer ever claimed.
    pub async fn check_timeout(&mut self, now: Instant) -> Option<CallNotice> {
        if let Some(since) = self.provisional_since {
            if now.saturating_duration_since(since) >= PROVISIONAL_PEER_TTL {
                debug!("No offer followed the early candidates, closing peer");
                self.close_peer().await;
            }
        }

        let timeout = self.config.answer_timeout?;
        let since = self.connecting_since?;
        if self.state != CallState::Connecting || now.saturating_duration_since(since) < timeout {
            return None;
        }
        warn!(to = ?self.remote_user.map(|u| u.get()), "No answer, ending call");
        self.hang_up().await;
        Some(CallNotice::no_answer())
    }

    /// Returns the new muted state.
    pub fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let stream = self.stream.as_ref().ok_or(CallError::NoActiveCall)?;
        self.is_muted = !self.is_muted;
        stream.set_enabled(MediaKind::Audio, !self.is_muted);
        Ok(self.is_muted)
    }

    /// Returns the new video-enabled state.
    pub fn toggle_video(&mut self) -> Result<bool, CallError> {
        let stream = self.stream.as_ref().ok_or(CallError::NoActiveCall)?;
        self.is_video_enabled = !self.is_video_enabled;
        stream.set_enabled(MediaKind::Video, self.is_video_enabled);
        Ok(self.is_video_enabled)
    }

    async fn ensure_media(&mut self) -> Result<(), CallError> {
        if self.stream.is_none() {
            let stream = self.devices.get_user_media(&self.config.constraints).await?;
            debug!(tracks = stream.tracks().len(), "Local media acquired");
            self.stream = Some(stream);
        }
        Ok(())
    }

    /// Creates the peer on first use and attaches local media that is not
    /// attached yet.
    async fn ensure_peer(&mut self) -> Result<&dyn PeerConnection, CallError> {
        if self.peer.is_none() {
            let peer = self.factory.create(self.candidate_tx.clone()).await?;
            self.peer = Some(peer);
            self.stream_attached = false;
        }
        let Some(peer) = self.peer.as_deref() else {
            return Err(CallError::Negotiation(PeerError::Closed));
        };
        if !self.stream_attached {
            if let Some(stream) = &self.stream {
                peer.add_local_stream(stream).await?;
                self.stream_attached = true;
            }
        }
        Ok(peer)
    }

    fn just_ended(&self, now: Instant) -> bool {
        self.ended_at
            .is_some_and(|ended| now.saturating_duration_since(ended) < LATE_CANDIDATE_WINDOW)
    }

    async fn close_peer(&mut self) {
        self.provisional_since = None;
        self.stream_attached = false;
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!(error = %e, "Error closing peer connection");
            }
        }
    }

    async fn teardown(&mut self) {
        self.close_peer().await;
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
    }

    /// Tear down a failed attempt and hand the error back.
    async fn abort(&mut self, err: CallError) -> CallError {
        warn!(error = %err, "Call attempt failed");
        self.teardown().await;
        self.ended_at = Some(Instant::now());
        self.set_state(CallState::Ended);
        self.reset();
        err
    }
}
