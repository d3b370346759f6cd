//! Drives a [`CallSession`] from relay traffic and UI commands.
//!
//! The controller owns the session and the receiving half of the relay
//! connection. Signaling envelopes go into the session, chat envelopes
//! become [`ClientEvent`]s, and whatever the session produces is sent back
//! through the [`RelayClient`].

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use telecare_media::{CallError, CallNotice, CallSession};
use telecare_shared::protocol::{ClientEnvelope, ServerEnvelope};
use telecare_shared::types::UserId;

use crate::events::ClientEvent;
use crate::relay::RelayClient;

/// Local candidates are flushed and the answer timeout checked this often.
const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    Start(UserId),
    HangUp,
    ToggleMute,
    ToggleVideo,
}

pub struct CallController {
    session: CallSession,
    relay: RelayClient,
    events: mpsc::Sender<ClientEvent>,
}

impl CallController {
    pub fn new(session: CallSession, relay: RelayClient, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            session,
            relay,
            events,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    /// Run until the command channel closes or the relay disconnects.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CallCommand>,
        mut incoming: mpsc::Receiver<ServerEnvelope>,
    ) {
        let mut states = self.session.subscribe();
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                envelope = incoming.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope).await,
                    None => {
                        info!("Relay connection lost");
                        self.emit(ClientEvent::Disconnected).await;
                        break;
                    }
                },
                state = states.recv() => match state {
                    Ok(state) => self.emit(ClientEvent::CallStateChanged(state)).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Call state events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    if let Some(notice) = self.session.check_timeout(Instant::now()).await {
                        self.emit(ClientEvent::Notice(notice)).await;
                    }
                }
            }
            self.flush_candidates().await;
        }

        self.session.hang_up().await;
        while let Ok(state) = states.try_recv() {
            self.emit(ClientEvent::CallStateChanged(state)).await;
        }
    }

    pub async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::Start(remote) => match self.session.start_call(remote).await {
                Ok(offer) => self.send(&offer).await,
                Err(e) => self.report(e).await,
            },
            CallCommand::HangUp => self.session.hang_up().await,
            CallCommand::ToggleMute => match self.session.toggle_mute() {
                Ok(_) => self.emit_media_state().await,
                Err(e) => self.report(e).await,
            },
            CallCommand::ToggleVideo => match self.session.toggle_video() {
                Ok(_) => self.emit_media_state().await,
                Err(e) => self.report(e).await,
            },
        }
    }

    pub async fn handle_envelope(&mut self, envelope: ServerEnvelope) {
        match envelope {
            ServerEnvelope::Chat { message } => self.emit(ClientEvent::ChatReceived(message)).await,
            ServerEnvelope::ChatSent { message } => self.emit(ClientEvent::ChatSent(message)).await,
            ServerEnvelope::Error { message } => {
                debug!(%message, "Relay reported an error");
                self.emit(ClientEvent::RelayError(message)).await;
            }
            ServerEnvelope::VideoOffer(offer) => {
                self.emit(ClientEvent::IncomingCall {
                    from: offer.from_user_id,
                    name: offer.from_user_name.clone(),
                })
                .await;
                match self.session.handle_offer(offer).await {
                    Ok(answer) => self.send(&answer).await,
                    Err(CallError::Busy) => debug!("Declined offer while busy"),
                    Err(e) => self.report(e).await,
                }
            }
            ServerEnvelope::VideoAnswer(answer) => match self.session.handle_answer(answer).await {
                Ok(()) => {}
                Err(CallError::Unexpected(_)) => {}
                Err(e) => self.report(e).await,
            },
            ServerEnvelope::IceCandidate(candidate) => {
                if let Err(e) = self.session.handle_ice_candidate(candidate.candidate).await {
                    debug!(error = %e, "Remote candidate not applied");
                }
            }
        }
    }

    async fn flush_candidates(&mut self) {
        for envelope in self.session.take_local_candidates() {
            self.send(&envelope).await;
        }
    }

    async fn send(&self, envelope: &ClientEnvelope) {
        if let Err(e) = self.relay.send(envelope).await {
            warn!(kind = envelope.kind(), error = %e, "Failed to send to relay");
        }
    }

    async fn report(&self, err: CallError) {
        warn!(error = %err, "Call operation failed");
        self.emit(ClientEvent::Notice(CallNotice::from(&err))).await;
    }

    async fn emit_media_state(&self) {
        self.emit(ClientEvent::MediaState {
            is_muted: self.session.is_muted(),
            is_video_enabled: self.session.is_video_enabled(),
        })
        .await;
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}
