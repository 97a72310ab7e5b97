//! Gapless playback of remote model audio via cpal.
//!
//! Inbound chunks arrive with network jitter but must play back to back.
//! [`PlaybackScheduler`] tracks the output clock in samples and assigns
//! each chunk a start position of `max(next_start, now)`, advancing
//! `next_start` by the chunk's duration, so chunks never overlap and
//! never leave a gap while the queue is non-empty. `interrupt()` clears
//! everything scheduled and rewinds `next_start` to the clock, letting a
//! new utterance start cleanly after a barge-in.

use crate::config::AudioConfig;
use crate::error::{AgentError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// A chunk scheduled on the output clock.
struct ScheduledChunk {
    /// Start position in output samples.
    start: u64,
    samples: Vec<f32>,
    /// Samples already played.
    position: usize,
}

/// Sample-clock scheduler for gapless, interruptible playback.
///
/// Pure state machine: the output stream callback drives it via [`fill`],
/// which makes the scheduling invariants testable without a device.
///
/// [`fill`]: PlaybackScheduler::fill
pub struct PlaybackScheduler {
    /// Output clock in samples since the stream started.
    clock: u64,
    /// Where the next enqueued chunk will start.
    next_start: u64,
    queue: VecDeque<ScheduledChunk>,
    sample_rate: u32,
}

impl PlaybackScheduler {
    /// Create a scheduler for an output stream at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            clock: 0,
            next_start: 0,
            queue: VecDeque::new(),
            sample_rate,
        }
    }

    /// Schedule a decoded chunk and return its start position.
    ///
    /// The start is `max(next_start, clock_now)`, so a chunk arriving
    /// after a playback gap starts immediately instead of in the past.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> u64 {
        let start = self.next_start.max(self.clock);
        self.next_start = start + samples.len() as u64;
        self.queue.push_back(ScheduledChunk {
            start,
            samples,
            position: 0,
        });
        start
    }

    /// Stop everything scheduled or playing and rewind `next_start` to
    /// the current clock (barge-in).
    pub fn interrupt(&mut self) {
        self.queue.clear();
        self.next_start = self.clock;
    }

    /// Fill an output buffer, advancing the clock by its length. Emits
    /// silence before a chunk's start and whenever the queue is empty.
    /// Completed chunks are dropped as soon as their last sample plays.
    pub fn fill(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            self.drop_completed();
            *slot = match self.queue.front_mut() {
                Some(chunk) if chunk.start <= self.clock => {
                    let sample = chunk.samples[chunk.position];
                    chunk.position += 1;
                    sample
                }
                _ => 0.0,
            };
            self.clock += 1;
        }
        self.drop_completed();
    }

    fn drop_completed(&mut self) {
        while self
            .queue
            .front()
            .is_some_and(|c| c.position >= c.samples.len())
        {
            self.queue.pop_front();
        }
    }

    /// Number of chunks still scheduled or playing.
    pub fn active_sources(&self) -> usize {
        self.queue.len()
    }

    /// Current output clock in samples.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Start position the next chunk would receive.
    pub fn next_start(&self) -> u64 {
        self.next_start.max(self.clock)
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Cloneable handle for feeding and interrupting the player from the
/// session's downlink task.
#[derive(Clone)]
pub struct PlayerHandle {
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    output_rate: u32,
}

impl PlayerHandle {
    /// Handle backed only by a scheduler, with no output stream. Used by
    /// tests and headless embeddings that drain the scheduler themselves.
    pub fn detached(output_rate: u32) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(PlaybackScheduler::new(output_rate))),
            output_rate,
        }
    }

    /// Decode a base64 PCM16 chunk and schedule it.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Decode`] for malformed payloads; the caller
    /// drops the chunk and playback continues.
    pub fn enqueue_base64(&self, payload: &str, sample_rate: u32) -> Result<u64> {
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| AgentError::Decode(format!("invalid base64 audio: {e}")))?;
        self.enqueue_pcm16(&bytes, sample_rate)
    }

    /// Decode a binary PCM16 chunk and schedule it.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Decode`] for malformed payloads.
    pub fn enqueue_pcm16(&self, bytes: &[u8], sample_rate: u32) -> Result<u64> {
        let samples = decode_pcm16(bytes)?;
        // The model's rate is tracked independently of the output clock;
        // resample when they differ.
        let samples = if sample_rate == self.output_rate {
            samples
        } else {
            super::capture::resample(&samples, sample_rate, self.output_rate)
        };

        let mut scheduler = lock(&self.scheduler);
        let start = scheduler.enqueue(samples);
        debug!(
            start,
            queued = scheduler.active_sources(),
            "scheduled playback chunk"
        );
        Ok(start)
    }

    /// Stop all scheduled audio immediately (barge-in).
    pub fn interrupt(&self) {
        let mut scheduler = lock(&self.scheduler);
        scheduler.interrupt();
        info!("playback interrupted, queue cleared");
    }

    /// Number of chunks currently scheduled or playing.
    pub fn active_sources(&self) -> usize {
        lock(&self.scheduler).active_sources()
    }
}

fn lock(scheduler: &Arc<Mutex<PlaybackScheduler>>) -> std::sync::MutexGuard<'_, PlaybackScheduler> {
    match scheduler.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Audio playback to system speakers via cpal.
pub struct RemoteAudioPlayer {
    device: cpal::Device,
    stream_config: StreamConfig,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    stream: Option<cpal::Stream>,
}

impl RemoteAudioPlayer {
    /// Create a new playback instance.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| AgentError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| AgentError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| AgentError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            scheduler: Arc::new(Mutex::new(PlaybackScheduler::new(config.output_sample_rate))),
            stream: None,
        })
    }

    /// Open the output stream and begin draining the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be created or started.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let scheduler = Arc::clone(&self.scheduler);
        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let Ok(mut scheduler) = scheduler.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    scheduler.fill(data);
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| AgentError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AgentError::Audio(format!("failed to start output stream: {e}")))?;

        self.stream = Some(stream);
        info!(
            "audio playback started at {}Hz",
            self.stream_config.sample_rate
        );
        Ok(())
    }

    /// Handle for the downlink task to enqueue and interrupt.
    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            scheduler: Arc::clone(&self.scheduler),
            output_rate: self.stream_config.sample_rate,
        }
    }

    /// Stop the output stream and clear anything scheduled. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        lock(&self.scheduler).interrupt();
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
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

impl Drop for RemoteAudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decode little-endian 16-bit PCM bytes into f32 samples.
///
/// # Errors
///
/// Returns [`AgentError::Decode`] when the byte count is odd.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(AgentError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            f32::from(value) / f32::from(i16::MAX)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn handle(rate: u32) -> PlayerHandle {
        PlayerHandle::detached(rate)
    }

    #[test]
    fn starts_are_non_decreasing_and_non_overlapping() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        let mut previous_end = 0;
        for len in [100_usize, 50, 300, 1] {
            let start = scheduler.enqueue(vec![0.1; len]);
            assert!(start >= previous_end, "chunk overlaps its predecessor");
            previous_end = start + len as u64;
        }
    }

    #[test]
    fn back_to_back_chunks_are_gapless() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        let first = scheduler.enqueue(vec![0.5; 128]);
        let second = scheduler.enqueue(vec![0.5; 64]);
        assert_eq!(second, first + 128);

        // The boundary between the chunks plays without silence.
        let mut out = vec![0.0; 192];
        scheduler.fill(&mut out);
        assert!(out.iter().all(|s| (*s - 0.5).abs() < f32::EPSILON));
    }

    #[test]
    fn chunk_after_gap_starts_at_clock() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        scheduler.enqueue(vec![0.5; 10]);
        // Drain past the queue: clock now beyond next_start.
        let mut out = vec![0.0; 100];
        scheduler.fill(&mut out);
        let start = scheduler.enqueue(vec![0.5; 10]);
        assert_eq!(start, 100);
    }

    #[test]
    fn fill_is_silent_before_scheduled_start() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        // Play 10 samples of silence first so the chunk starts mid-buffer.
        let mut out = vec![1.0; 10];
        scheduler.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        scheduler.enqueue(vec![0.5; 4]);
        let mut out = vec![0.0; 8];
        scheduler.fill(&mut out);
        assert_eq!(&out[..4], &[0.5, 0.5, 0.5, 0.5]);
        assert_eq!(&out[4..], &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn completed_chunks_are_dropped() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        scheduler.enqueue(vec![0.5; 32]);
        scheduler.enqueue(vec![0.5; 32]);
        assert_eq!(scheduler.active_sources(), 2);

        let mut out = vec![0.0; 32];
        scheduler.fill(&mut out);
        assert_eq!(scheduler.active_sources(), 1);

        scheduler.fill(&mut out);
        assert_eq!(scheduler.active_sources(), 0);
    }

    #[test]
    fn interrupt_clears_queue_and_resets_next_start() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        scheduler.enqueue(vec![0.5; 1000]);
        scheduler.enqueue(vec![0.5; 1000]);

        let mut out = vec![0.0; 64];
        scheduler.fill(&mut out);

        scheduler.interrupt();
        assert_eq!(scheduler.active_sources(), 0);
        assert_eq!(scheduler.next_start(), scheduler.clock());

        // Playback is silent after the interrupt.
        let mut out = vec![1.0; 64];
        scheduler.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        // A new utterance starts at the clock, not after the old queue.
        let start = scheduler.enqueue(vec![0.5; 10]);
        assert_eq!(start, scheduler.clock());
    }

    #[test]
    fn interrupt_on_empty_scheduler_is_harmless() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        scheduler.interrupt();
        assert_eq!(scheduler.active_sources(), 0);
        assert_eq!(scheduler.next_start(), 0);
    }

    #[test]
    fn decode_pcm16_round_trips_encoder_output() {
        let samples = vec![0.0_f32, 0.5, -0.5, 1.0, -1.0];
        let bytes = super::super::capture::encode_pcm16(&samples);
        let decoded = decode_pcm16(&bytes).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn decode_pcm16_rejects_odd_length() {
        let result = decode_pcm16(&[0, 1, 2]);
        assert!(matches!(result, Err(AgentError::Decode(_))));
    }

    #[test]
    fn handle_rejects_invalid_base64() {
        let handle = handle(24_000);
        let result = handle.enqueue_base64("not-base64!!!", 24_000);
        assert!(matches!(result, Err(AgentError::Decode(_))));
        assert_eq!(handle.active_sources(), 0);
    }

    #[test]
    fn handle_resamples_foreign_rate_chunks() {
        let handle = handle(24_000);
        let bytes = super::super::capture::encode_pcm16(&vec![0.25_f32; 480]);
        handle.enqueue_pcm16(&bytes, 48_000).unwrap();
        let scheduler = lock(&handle.scheduler);
        assert_eq!(scheduler.active_sources(), 1);
        // 480 samples at 48kHz become 240 at 24kHz.
        assert_eq!(scheduler.next_start(), 240);
    }
}
