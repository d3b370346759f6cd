//! # telecare-media
//!
//! Client side of a Telecare video consultation: the [`CallSession`] state
//! machine, the [`PeerConnection`] and [`MediaDevices`] seams it drives, and
//! `webrtc`-crate implementations of both. The `capture` feature adds
//! microphone capture through `cpal`.

pub mod call;
pub mod capture;
pub mod devices;
pub mod error;
pub mod peer;

pub use call::{CallConfig, CallNotice, CallSession, CallState};
pub use capture::{run_audio_pump, PcmuEncoder};
pub use devices::{LocalStream, LocalTrack, MediaConstraints, MediaDevices, MediaKind, WebRtcDevices};
pub use error::{CallError, MediaError, PeerError};
pub use peer::{IceConfig, PeerConnection, PeerFactory, WebRtcPeerFactory};
