//! Microphone capture into a local audio track.
//!
//! The device callback cuts interleaved `f32` samples into fixed-length
//! frames and hands them to a pump task over a bounded channel. The pump
//! downmixes, resamples to 8 kHz and G.711 mu-law encodes each frame, then
//! writes it to the track's RTP sink. While the track is disabled (muted)
//! the pump sends silence so the remote playout clock keeps running. Once
//! the track is stopped the pump exits and the device stream is dropped.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::media::Sample;

use crate::devices::LocalTrack;
#[cfg(any(feature = "capture", test))]
use crate::error::MediaError;

/// PCMU clock rate.
pub const PCMU_RATE: u32 = 8000;

/// mu-law encoding of a zero sample.
const PCMU_SILENCE: u8 = 0xFF;

/// Frames buffered between the device callback and the pump.
#[cfg(feature = "capture")]
const FRAME_QUEUE: usize = 32;

/// Encode one 16-bit linear sample as G.711 mu-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while value & mask == 0 && exponent > 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

/// Turns device frames into PCMU payloads.
#[derive(Debug, Clone)]
pub struct PcmuEncoder {
    source_rate: u32,
    channels: u16,
    frame_duration: Duration,
}

impl PcmuEncoder {
    pub fn new(source_rate: u32, channels: u16, frame_duration: Duration) -> Self {
        Self {
            source_rate: source_rate.max(1),
            channels: channels.max(1),
            frame_duration,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    fn output_len(&self) -> usize {
        (PCMU_RATE as u128 * self.frame_duration.as_micros() / 1_000_000) as usize
    }

    /// Encode one interleaved frame. A disabled track yields silence of the
    /// same length.
    pub fn encode(&self, frame: &[f32], enabled: bool) -> Vec<u8> {
        let out_len = self.output_len();
        if !enabled {
            return vec![PCMU_SILENCE; out_len];
        }

        let channels = self.channels as usize;
        let source_frames = frame.len() / channels;
        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let src = i as u64 * self.source_rate as u64 / PCMU_RATE as u64;
            let src = (src as usize).min(source_frames.saturating_sub(1));
            let start = src * channels;
            let mono = match frame.get(start..start + channels) {
                Some(samples) => samples.iter().sum::<f32>() / channels as f32,
                None => 0.0,
            };
            let linear = (mono.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.push(linear_to_ulaw(linear));
        }
        out
    }
}

/// Feed frames into `track` until it is stopped or the source goes away.
pub async fn run_audio_pump(
    track: LocalTrack,
    encoder: PcmuEncoder,
    mut frames: mpsc::Receiver<Vec<f32>>,
) {
    let Some(rtp) = track.rtp_track() else {
        debug!(track = %track.id(), "Track has no RTP sink, not pumping audio");
        return;
    };

    let mut written: u64 = 0;
    while let Some(frame) = frames.recv().await {
        if !track.is_live() {
            break;
        }
        let sample = Sample {
            data: Bytes::from(encoder.encode(&frame, track.is_enabled())),
            duration: encoder.frame_duration(),
            ..Default::default()
        };
        if let Err(e) = rtp.write_sample(&sample).await {
            warn!(track = %track.id(), error = %e, "Failed to write audio sample");
        }
        written += 1;
    }
    debug!(track = %track.id(), frames = written, "Audio pump stopped");
}

/// Map a device failure message onto the user-facing error kinds.
#[cfg(any(feature = "capture", test))]
pub(crate) fn device_error(kind: &'static str, message: String) -> MediaError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        MediaError::PermissionDenied(kind)
    } else {
        MediaError::Device(format!("{kind}: {message}"))
    }
}

/// Open the default input device and start feeding `track`.
///
/// The `cpal` stream lives on its own thread, since it is not `Send` on
/// every host, and is dropped once the track stops.
#[cfg(feature = "capture")]
pub async fn open_microphone(
    track: LocalTrack,
    config: &crate::devices::AudioConfig,
) -> Result<(), MediaError> {
    use tokio::sync::oneshot;

    let (ready_tx, ready_rx) = oneshot::channel();
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
    let device_config = config.clone();
    let watched = track.clone();

    std::thread::Builder::new()
        .name("telecare-mic".into())
        .spawn(move || {
            let stream = match microphone::build_stream(&device_config, frame_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            while watched.is_live() {
                std::thread::sleep(Duration::from_millis(100));
            }
            drop(stream);
            debug!(track = %watched.id(), "Microphone released");
        })
        .map_err(|e| MediaError::Device(e.to_string()))?;

    ready_rx
        .await
        .map_err(|_| MediaError::Device("capture thread exited".into()))??;

    let encoder = PcmuEncoder::new(
        config.sample_rate,
        config.channels,
        Duration::from_millis(config.frame_size_ms as u64),
    );
    tokio::spawn(run_audio_pump(track, encoder, frame_rx));
    Ok(())
}

#[cfg(feature = "capture")]
mod microphone {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tokio::sync::mpsc;
    use tracing::{error, info, warn};

    use super::device_error;
    use crate::devices::AudioConfig;
    use crate::error::MediaError;

    const KIND: &str = "microphone";

    pub(super) fn build_stream(
        config: &AudioConfig,
        frame_tx: mpsc::Sender<Vec<f32>>,
    ) -> Result<cpal::Stream, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaError::NoDevice(KIND))?;

        info!(device = ?device.name(), "Using input device");

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_len = config.frame_size_samples();
        let mut buffer = Vec::with_capacity(frame_len);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if frame_tx.is_closed() {
                        return;
                    }
                    buffer.extend_from_slice(data);
                    while buffer.len() >= frame_len {
                        let frame: Vec<f32> = buffer.drain(..frame_len).collect();
                        if frame_tx.try_send(frame).is_err() {
                            warn!("Audio frame channel full, dropping frame");
                        }
                    }
                },
                move |err| {
                    error!("Audio input error: {err}");
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => MediaError::NoDevice(KIND),
                other => device_error(KIND, other.to_string()),
            })?;

        stream.play().map_err(|e| match e {
            cpal::PlayStreamError::DeviceNotAvailable => MediaError::NoDevice(KIND),
            other => device_error(KIND, other.to_string()),
        })?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use webrtc::api::media_engine::MIME_TYPE_PCMU;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    use super::*;
    use crate::devices::MediaKind;

    fn pcmu_track() -> LocalTrack {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "test".to_owned(),
        ));
        LocalTrack::with_rtp(MediaKind::Audio, rtp)
    }

    #[test]
    fn ulaw_reference_points() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
        assert_eq!(linear_to_ulaw(-1) & 0x80, 0, "negative samples clear the sign bit");
    }

    #[test]
    fn stereo_48k_frame_becomes_160_bytes() {
        let encoder = PcmuEncoder::new(48000, 2, Duration::from_millis(20));
        let frame = vec![0.5f32; 960 * 2];

        let encoded = encoder.encode(&frame, true);
        assert_eq!(encoded.len(), 160);
        assert!(encoded.iter().all(|&b| b == encoded[0]));
        assert_ne!(encoded[0], PCMU_SILENCE);
    }

    #[test]
    fn disabled_track_sends_silence() {
        let encoder = PcmuEncoder::new(48000, 1, Duration::from_millis(20));
        let frame = vec![0.9f32; 960];
        assert_eq!(encoder.encode(&frame, false), vec![PCMU_SILENCE; 160]);
    }

    #[test]
    fn short_frame_is_padded_not_panicking() {
        let encoder = PcmuEncoder::new(48000, 2, Duration::from_millis(20));
        assert_eq!(encoder.encode(&[0.1, 0.1, 0.2], true).len(), 160);
        assert_eq!(encoder.encode(&[], true), vec![PCMU_SILENCE; 160]);
    }

    #[test]
    fn device_messages_map_to_error_kinds() {
        assert!(matches!(
            device_error("microphone", "Access denied by the OS".into()),
            MediaError::PermissionDenied("microphone")
        ));
        assert!(matches!(
            device_error("microphone", "Permission not granted".into()),
            MediaError::PermissionDenied(_)
        ));
        assert!(matches!(
            device_error("microphone", "sample format not supported".into()),
            MediaError::Device(_)
        ));
    }

    #[tokio::test]
    async fn pump_exits_once_track_stops() {
        let track = pcmu_track();
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(run_audio_pump(
            track.clone(),
            PcmuEncoder::new(8000, 1, Duration::from_millis(20)),
            rx,
        ));

        tx.send(vec![0.2; 160]).await.unwrap();
        track.stop();
        let _ = tx.send(vec![0.2; 160]).await;

        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump did not stop")
            .unwrap();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn pump_exits_when_source_closes() {
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(run_audio_pump(
            pcmu_track(),
            PcmuEncoder::new(8000, 1, Duration::from_millis(20)),
            rx,
        ));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump did not stop")
            .unwrap();
    }
}
