//! End-to-end voice session test.
//!
//! Requires real audio devices, so it is `#[ignore]`d for CI. Run
//! manually with `cargo test --test voice -- --ignored`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tokio::sync::mpsc;
use vela::config::RealtimeConfig;
use vela::error::Result;
use vela::pipeline::messages::AudioFrame;
use vela::session::channel::{ChannelEvent, RealtimeChannel, RealtimeConnector};
use vela::{AgentConfig, SessionLifecycleController, SessionState};

/// Echoes every uplink frame straight back as model audio, so the
/// session plays the microphone through the speakers.
struct LoopbackConnector;

struct LoopbackChannel {
    events: mpsc::Sender<ChannelEvent>,
}

impl RealtimeChannel for LoopbackChannel {
    fn send_frame(&self, frame: &AudioFrame) {
        let _ = self.events.try_send(ChannelEvent::Audio {
            payload: BASE64.encode(&frame.pcm),
            sample_rate: frame.sample_rate,
        });
    }

    fn close(&self) {
        let _ = self.events.try_send(ChannelEvent::Closed { reason: None });
    }
}

#[async_trait]
impl RealtimeConnector for LoopbackConnector {
    async fn open(
        &self,
        _config: &RealtimeConfig,
        _capture_sample_rate: u32,
    ) -> Result<(Arc<dyn RealtimeChannel>, mpsc::Receiver<ChannelEvent>)> {
        let (events, events_rx) = mpsc::channel(64);
        Ok((Arc::new(LoopbackChannel { events }), events_rx))
    }
}

#[tokio::test]
#[ignore = "requires microphone and speakers"]
async fn live_session_loops_microphone_to_speakers() {
    let controller =
        SessionLifecycleController::with_connector(&AgentConfig::default(), Arc::new(LoopbackConnector));

    controller.start().await.unwrap();
    assert_eq!(controller.state(), SessionState::Connected);

    // Let a second of audio loop through capture → channel → playback.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    controller.stop().await;
    assert_eq!(controller.state(), SessionState::Closed);

    // Teardown is idempotent.
    controller.stop().await;
    assert_eq!(controller.state(), SessionState::Closed);
}
