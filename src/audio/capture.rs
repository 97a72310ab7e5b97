//! Microphone capture and wire encoding using cpal.
//!
//! Captures audio at the device's native sample rate, resamples to the
//! configured capture rate, and re-blocks it into fixed-size frames. Each
//! frame carries its RMS loudness (for the UI meter) and the samples
//! encoded as little-endian 16-bit PCM (the uplink wire format).

use crate::config::AudioConfig;
use crate::error::{AgentError, Result};
use crate::pipeline::messages::AudioFrame;
use crate::runtime::AgentEvent;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Microphone capture and frame encoding via cpal.
///
/// The capture callback runs on the platform's real-time audio thread and
/// performs no I/O: it converts samples, computes loudness, and hands the
/// frame off with `try_send`. Frames are dropped silently when the uplink
/// is not keeping up; stale real-time audio is worse than a skipped frame.
pub struct AudioCaptureEncoder {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// The wire sample rate frames are resampled to.
    target_sample_rate: u32,
    /// Samples per emitted frame.
    frame_size: usize,
}

impl AudioCaptureEncoder {
    /// Create a new capture instance.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then resamples to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::PermissionDenied`] when the platform refuses
    /// microphone access, or [`AgentError::Audio`] for any other device
    /// failure.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| classify_device_error(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| AgentError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| classify_device_error("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        // Use the device's default config for best compatibility
        let default_config = device
            .default_input_config()
            .map_err(|e| classify_device_error(format!("no default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels",
            stream_config.sample_rate, stream_config.channels
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.capture_sample_rate,
            frame_size: config.frame_size,
        })
    }

    /// Run the capture loop, emitting encoded frames on `tx` until the
    /// cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio stream cannot be created or started.
    pub async fn run(
        &self,
        tx: mpsc::Sender<AudioFrame>,
        events: Option<broadcast::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let frame_size = self.frame_size;
        let tx_clone = tx.clone();

        // Carries the residue between device callbacks so emitted frames
        // have a constant size regardless of the device's buffer size.
        let mut pending: Vec<f32> = Vec::with_capacity(frame_size * 2);

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };

                    let samples = if native_rate != target_rate {
                        resample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };

                    pending.extend_from_slice(&samples);
                    while pending.len() >= frame_size {
                        let block: Vec<f32> = pending.drain(..frame_size).collect();
                        let frame = encode_frame(&block, target_rate);

                        if let Some(ref ev) = events {
                            let _ = ev.send(AgentEvent::MicLevel {
                                loudness: frame.loudness,
                            });
                        }
                        // try_send: never block the real-time audio thread.
                        if tx_clone.try_send(frame).is_err() {
                            debug!("uplink channel full, dropping frame");
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| classify_device_error(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AgentError::Audio(format!("failed to start input stream: {e}")))?;

        info!(
            "audio capture started: native {}Hz -> wire {}Hz, {} samples/frame",
            native_rate, target_rate, frame_size
        );

        // Hold the stream alive until cancelled
        cancel.cancelled().await;

        drop(stream);
        info!("audio capture stopped");
        Ok(())
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AgentError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Map platform access refusals onto the permission variant; everything
/// else stays a generic audio error.
fn classify_device_error(message: String) -> AgentError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        AgentError::PermissionDenied(message)
    } else {
        AgentError::Audio(message)
    }
}

/// Build one wire frame from a fixed-size sample block.
fn encode_frame(block: &[f32], sample_rate: u32) -> AudioFrame {
    AudioFrame {
        pcm: encode_pcm16(block),
        samples: block.len(),
        sample_rate,
        loudness: rms_loudness(block),
    }
}

/// RMS loudness scaled to [0, 1] for a UI meter.
///
/// Scaled by √2 so a full-scale sine reads 1.0, then clamped so DC or
/// clipped input cannot exceed the meter range. Silence reads exactly 0.
pub fn rms_loudness(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    (rms * std::f32::consts::SQRT_2).clamp(0.0, 1.0)
}

/// Convert f32 samples in [-1, 1] to little-endian 16-bit PCM bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation resampler.
///
/// Converts audio from `src_rate` to `dst_rate`. For speech (48kHz → 24kHz
/// and similar ratios) this is sufficient quality — no anti-alias filter
/// needed since speech energy sits well below the Nyquist limit.
pub fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn loudness_is_zero_for_silence() {
        let silence = vec![0.0_f32; 4096];
        assert_eq!(rms_loudness(&silence), 0.0);
    }

    #[test]
    fn loudness_is_zero_for_empty_block() {
        assert_eq!(rms_loudness(&[]), 0.0);
    }

    #[test]
    fn loudness_near_one_for_full_scale_sine() {
        let block: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * std::f32::consts::TAU / 64.0).sin())
            .collect();
        let loudness = rms_loudness(&block);
        assert!(loudness > 0.95 && loudness <= 1.0, "got {loudness}");
    }

    #[test]
    fn loudness_clamped_for_full_scale_dc() {
        let block = vec![1.0_f32; 4096];
        assert_eq!(rms_loudness(&block), 1.0);
    }

    #[test]
    fn loudness_in_unit_range_for_arbitrary_input() {
        let block: Vec<f32> = (0..4096).map(|i| ((i * 7919) % 200) as f32 - 100.0).collect();
        let loudness = rms_loudness(&block);
        assert!((0.0..=1.0).contains(&loudness));
    }

    #[test]
    fn pcm16_encoding_is_little_endian() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(&bytes[2..4], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[4..6], &(-i16::MAX).to_le_bytes());
    }

    #[test]
    fn pcm16_clamps_out_of_range_samples() {
        let bytes = encode_pcm16(&[2.0, -2.0]);
        assert_eq!(&bytes[0..2], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[2..4], &(-i16::MAX).to_le_bytes());
    }

    #[test]
    fn to_mono_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn resample_halves_sample_count() {
        let samples = vec![0.5_f32; 480];
        let out = resample(&samples, 48_000, 24_000);
        assert_eq!(out.len(), 240);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(resample(&samples, 24_000, 24_000), samples);
    }

    #[test]
    fn encode_frame_carries_block_metadata() {
        let block = vec![0.0_f32; 4096];
        let frame = encode_frame(&block, 24_000);
        assert_eq!(frame.samples, 4096);
        assert_eq!(frame.pcm.len(), 8192);
        assert_eq!(frame.sample_rate, 24_000);
        assert_eq!(frame.loudness, 0.0);
        assert!((frame.duration_secs() - 4096.0 / 24_000.0).abs() < 1e-6);
    }
}
