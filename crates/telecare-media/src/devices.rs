//! Local media: tracks, streams, and the device abstraction that produces
//! them.
//!
//! A [`LocalTrack`] carries two shared flags. `enabled` is what mute and
//! camera-off toggle; `live` goes false once the track is stopped and never
//! comes back. Clones share the flags, so a stopped track is stopped
//! everywhere.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_PCMU, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::capture::PCMU_RATE;
use crate::error::MediaError;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            frame_size_ms: 20,
        }
    }
}

impl AudioConfig {
    /// Interleaved samples in one capture frame.
    pub fn frame_size_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_size_ms as usize / 1000) * self.channels as usize
    }
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// What to ask the devices for. `None` skips that kind.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub audio: Option<AudioConfig>,
    pub video: Option<VideoConfig>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: Some(AudioConfig::default()),
            video: Some(VideoConfig::default()),
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: Some(AudioConfig::default()),
            video: None,
        }
    }
}

#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
    rtp: Option<Arc<TrackLocalStaticSample>>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

impl LocalTrack {
    /// A track with no RTP sink, for backends that carry media elsewhere.
    pub fn new(kind: MediaKind) -> Self {
        let id = format!(
            "{}-{}",
            kind.as_str(),
            NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            id,
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
            rtp: None,
        }
    }

    pub fn with_rtp(kind: MediaKind, rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            rtp: Some(rtp),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Sample sink the capture pipeline writes encoded frames into.
    pub fn rtp_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.rtp.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(track = %self.id, enabled, "Track enabled state changed");
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.enabled.store(false, Ordering::SeqCst);
            debug!(track = %self.id, "Track stopped");
        }
    }
}

/// Tracks acquired together for one call.
#[derive(Debug, Clone, Default)]
pub struct LocalStream {
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn active_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Source of local media, the camera/microphone prompt equivalent.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &MediaConstraints)
        -> Result<LocalStream, MediaError>;
}

/// Devices backed by `webrtc` sample tracks.
///
/// Built with [`WebRtcDevices::new`], the audio track is Opus and the
/// application's own pipeline feeds encoded samples into
/// [`LocalTrack::rtp_track`]. With the `capture` feature,
/// [`WebRtcDevices::with_microphone`] opens the default input device and
/// streams it as PCMU instead. Video is always a VP8 sample track fed by the
/// application.
#[derive(Debug, Clone)]
pub struct WebRtcDevices {
    stream_id: String,
    microphone: bool,
}

impl WebRtcDevices {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            microphone: false,
        }
    }

    /// Capture audio from the default input device.
    #[cfg(feature = "capture")]
    pub fn with_microphone(stream_id: impl Into<String>) -> Self {
        Self {
            microphone: true,
            ..Self::new(stream_id)
        }
    }

    fn sample_track(&self, kind: MediaKind, capability: RTCRtpCodecCapability) -> LocalTrack {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            capability,
            kind.as_str().to_owned(),
            self.stream_id.clone(),
        ));
        LocalTrack::with_rtp(kind, rtp)
    }

    #[cfg(feature = "capture")]
    async fn start_microphone(
        &self,
        track: &LocalTrack,
        audio: &AudioConfig,
    ) -> Result<(), MediaError> {
        if self.microphone {
            crate::capture::open_microphone(track.clone(), audio).await?;
        }
        Ok(())
    }

    #[cfg(not(feature = "capture"))]
    async fn start_microphone(
        &self,
        _track: &LocalTrack,
        _audio: &AudioConfig,
    ) -> Result<(), MediaError> {
        Ok(())
    }

    fn audio_capability(&self, audio: &AudioConfig) -> RTCRtpCodecCapability {
        if self.microphone {
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_RATE,
                channels: 1,
                ..Default::default()
            }
        } else {
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: audio.sample_rate,
                channels: audio.channels,
                ..Default::default()
            }
        }
    }
}

#[async_trait]
impl MediaDevices for WebRtcDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalStream, MediaError> {
        if constraints.audio.is_none() && constraints.video.is_none() {
            return Err(MediaError::NothingRequested);
        }

        let mut tracks = Vec::new();

        if let Some(audio) = &constraints.audio {
            let track = self.sample_track(MediaKind::Audio, self.audio_capability(audio));
            self.start_microphone(&track, audio).await?;
            tracks.push(track);
        }

        if let Some(video) = &constraints.video {
            info!(
                width = video.width,
                height = video.height,
                fps = video.fps,
                "Opening video track"
            );
            tracks.push(self.sample_track(
                MediaKind::Video,
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
            ));
        }

        Ok(LocalStream::new(tracks))
    }
}
