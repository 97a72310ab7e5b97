//! Voice session lifecycle.
//!
//! [`SessionLifecycleController`] owns every resource a live voice session
//! needs (the microphone capture stream, the playback stream, and the
//! realtime channel) and guarantees a single teardown path: explicit
//! `stop()`, acquisition failure, capture failure, and remote-signalled
//! close all release resources the same way. `stop()` is idempotent and
//! safe from any state, including concurrently with an in-flight
//! `start()`: the controller checks cancellation between acquisition
//! steps, so resources not yet acquired are simply never acquired.

pub mod channel;

use crate::audio::capture::AudioCaptureEncoder;
use crate::audio::playback::{PlayerHandle, RemoteAudioPlayer};
use crate::config::{AgentConfig, AudioConfig, RealtimeConfig};
use crate::error::{AgentError, Result};
use crate::pipeline::messages::AudioFrame;
use crate::runtime::AgentEvent;
use channel::{ChannelEvent, RealtimeChannel, RealtimeConnector, WsRealtimeConnector};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Frames buffered between the capture callback and the uplink task.
const FRAME_CHANNEL_SIZE: usize = 64;

/// Voice session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has run yet.
    Idle,
    /// `start()` is acquiring resources.
    Connecting,
    /// Audio is flowing both ways.
    Connected,
    /// A failure is being surfaced; teardown continues to `Closed`.
    Error,
    /// All resources released.
    Closed,
}

/// Everything a live session holds. Exclusively owned here; no other
/// component acquires or releases these directly.
struct SessionResources {
    cancel: CancellationToken,
    channel: Option<Arc<dyn RealtimeChannel>>,
    /// Capture, playback, uplink and downlink tasks. They exit on the
    /// cancelled token; handles are dropped (detached) at teardown.
    tasks: Vec<JoinHandle<()>>,
}

struct SessionInner {
    audio: AudioConfig,
    realtime: RealtimeConfig,
    connector: Arc<dyn RealtimeConnector>,
    state: Mutex<SessionState>,
    resources: tokio::sync::Mutex<Option<SessionResources>>,
    events: Option<broadcast::Sender<AgentEvent>>,
}

/// Controls the live voice session: `start()` / `stop()`.
pub struct SessionLifecycleController {
    inner: Arc<SessionInner>,
}

impl SessionLifecycleController {
    /// Create a controller using the production WebSocket connector.
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_connector(config, Arc::new(WsRealtimeConnector))
    }

    /// Create a controller with a custom connector (tests, embedding).
    pub fn with_connector(config: &AgentConfig, connector: Arc<dyn RealtimeConnector>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                audio: config.audio.clone(),
                realtime: config.realtime.clone(),
                connector,
                state: Mutex::new(SessionState::Idle),
                resources: tokio::sync::Mutex::new(None),
                events: None,
            }),
        }
    }

    /// Attach an event broadcaster for UI/observability.
    pub fn with_events(mut self, tx: broadcast::Sender<AgentEvent>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.events = Some(tx),
            None => warn!("cannot attach events to a shared session controller"),
        }
        self
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        match self.inner.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Start the voice session: acquire the microphone, the playback
    /// stream, and the streaming channel, then wire them together.
    ///
    /// A session that is already active is left running. A concurrent
    /// `stop()` aborts acquisition cleanly without an error.
    ///
    /// # Errors
    ///
    /// Returns an error when a resource cannot be acquired; the session
    /// is fully torn down before returning and a user-facing message is
    /// emitted on the event stream.
    pub async fn start(&self) -> Result<()> {
        let cancel = {
            let mut resources = self.inner.resources.lock().await;
            if resources.is_some() {
                warn!("voice session already active");
                return Ok(());
            }
            let cancel = CancellationToken::new();
            *resources = Some(SessionResources {
                cancel: cancel.clone(),
                channel: None,
                tasks: Vec::new(),
            });
            cancel
        };

        set_state(&self.inner, SessionState::Connecting);

        match self.acquire(cancel).await {
            Ok(true) => {
                set_state(&self.inner, SessionState::Connected);
                info!("voice session connected");
                Ok(())
            }
            Ok(false) => {
                // stop() raced the start; release whatever was acquired.
                teardown(&self.inner, None).await;
                Ok(())
            }
            Err(e) => {
                teardown(&self.inner, Some(user_message(&e))).await;
                Err(e)
            }
        }
    }

    /// Stop the session and release every acquired resource. Safe to call
    /// from any state, any number of times; never errors.
    pub async fn stop(&self) {
        teardown(&self.inner, None).await;
    }

    /// Acquire resources step by step, checking for a concurrent `stop()`
    /// between steps. Returns `Ok(false)` when the session was stopped
    /// mid-acquisition.
    async fn acquire(&self, cancel: CancellationToken) -> Result<bool> {
        // Microphone context first: permission failures surface here.
        let capture = AudioCaptureEncoder::new(&self.inner.audio)?;
        if cancel.is_cancelled() {
            return Ok(false);
        }

        // Output context. The cpal stream lives inside its own task; only
        // the scheduler handle crosses task boundaries.
        let player = RemoteAudioPlayer::new(&self.inner.audio)?;
        let player_handle = player.handle();
        let (ready_tx, ready_rx) = oneshot::channel();
        let player_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut player = player;
                let started = player.start();
                let failed = started.is_err();
                let _ = ready_tx.send(started);
                if failed {
                    return;
                }
                cancel.cancelled().await;
                player.stop();
            })
        };
        if !self.register(player_task).await {
            return Ok(false);
        }
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AgentError::Session(
                    "playback task exited before starting".into(),
                ));
            }
        }
        if cancel.is_cancelled() {
            return Ok(false);
        }

        // Streaming channel.
        let (remote, inbound_rx) = self
            .inner
            .connector
            .open(&self.inner.realtime, self.inner.audio.capture_sample_rate)
            .await?;
        {
            let mut guard = self.inner.resources.lock().await;
            match guard.as_mut() {
                Some(res) if !res.cancel.is_cancelled() => {
                    res.channel = Some(Arc::clone(&remote));
                }
                _ => {
                    remote.close();
                    return Ok(false);
                }
            }
        }

        // Uplink: capture frames → channel, fire-and-forget per frame.
        let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(FRAME_CHANNEL_SIZE);
        let capture_task = {
            let cancel = cancel.clone();
            let events = self.inner.events.clone();
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = capture.run(frame_tx, events, cancel).await {
                    error!("capture stage failed: {e}");
                    teardown(&inner, Some(user_message(&e))).await;
                }
            })
        };
        let uplink_task = {
            let cancel = cancel.clone();
            let remote = Arc::clone(&remote);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        frame = frame_rx.recv() => {
                            let Some(frame) = frame else { break };
                            remote.send_frame(&frame);
                        }
                    }
                }
            })
        };

        // Downlink: channel events → playback scheduling / barge-in.
        let downlink_task = {
            let cancel = cancel.clone();
            let inner = Arc::clone(&self.inner);
            let player = player_handle;
            let mut inbound_rx = inbound_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        event = inbound_rx.recv() => {
                            let Some(event) = event else {
                                teardown(&inner, Some("Voice connection lost".to_owned())).await;
                                break;
                            };
                            if !handle_channel_event(&player, &event) {
                                let reason = match event {
                                    ChannelEvent::Closed { reason } => reason,
                                    _ => None,
                                };
                                teardown(
                                    &inner,
                                    reason.map(|r| format!("Voice session ended: {r}")),
                                )
                                .await;
                                break;
                            }
                        }
                    }
                }
            })
        };

        for task in [capture_task, uplink_task, downlink_task] {
            if !self.register(task).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Record a spawned task in the live resources. Returns `false` when
    /// the session was stopped in the meantime (the task exits on its own
    /// via the already-cancelled token).
    async fn register(&self, task: JoinHandle<()>) -> bool {
        let mut guard = self.inner.resources.lock().await;
        match guard.as_mut() {
            Some(res) if !res.cancel.is_cancelled() => {
                res.tasks.push(task);
                true
            }
            _ => false,
        }
    }
}

/// Apply one inbound channel event to the player. Returns `false` when
/// the event ends the session. Malformed audio chunks are dropped and
/// playback continues.
fn handle_channel_event(player: &PlayerHandle, event: &ChannelEvent) -> bool {
    match event {
        ChannelEvent::Audio {
            payload,
            sample_rate,
        } => {
            if let Err(e) = player.enqueue_base64(payload, *sample_rate) {
                warn!("dropping malformed audio chunk: {e}");
            }
            true
        }
        ChannelEvent::Interrupted => {
            player.interrupt();
            true
        }
        ChannelEvent::Closed { .. } => false,
    }
}

/// The single teardown path for every termination cause. Idempotent:
/// resources are taken out of the controller exactly once.
async fn teardown(inner: &Arc<SessionInner>, failure: Option<String>) {
    if let Some(message) = failure {
        set_state(inner, SessionState::Error);
        if let Some(tx) = &inner.events {
            let _ = tx.send(AgentEvent::SessionMessage { text: message });
        }
    }

    let taken = inner.resources.lock().await.take();
    if let Some(res) = taken {
        res.cancel.cancel();
        if let Some(channel) = res.channel {
            channel.close();
        }
        // Tasks exit on the cancelled token; handles are detached rather
        // than awaited so teardown can run from inside a session task.
        drop(res.tasks);
        info!("voice session resources released");
    }

    set_state(inner, SessionState::Closed);
}

fn set_state(inner: &Arc<SessionInner>, state: SessionState) {
    let changed = {
        let mut guard = match inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == state {
            false
        } else {
            *guard = state;
            true
        }
    };
    if changed && let Some(tx) = &inner.events {
        let _ = tx.send(AgentEvent::SessionState(state));
    }
}

/// User-facing message for a session failure. Raw errors are logged, not
/// shown.
fn user_message(error: &AgentError) -> String {
    match error {
        AgentError::PermissionDenied(_) => {
            "Microphone access was denied. Please allow microphone access and try again."
                .to_owned()
        }
        AgentError::Connection(_) => {
            "Could not connect to the voice service. Please try again.".to_owned()
        }
        _ => "The voice session could not be started.".to_owned(),
    }
}
