//! Realtime voice channel — WebSocket client for the streaming endpoint.
//!
//! The session controller talks to the remote model through the
//! [`RealtimeConnector`] / [`RealtimeChannel`] seams; this module provides
//! the production WebSocket implementation. Outbound frames go through an
//! unbounded mpsc drained by a background task, so sending never blocks
//! and a dead connection just drops frames (audio is real-time; a skipped
//! frame beats a delayed one).

use crate::config::RealtimeConfig;
use crate::error::{AgentError, Result};
use crate::pipeline::messages::AudioFrame;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default rate of inbound model audio when the server does not announce one.
const DEFAULT_MODEL_SAMPLE_RATE: u32 = 24_000;

/// Buffer size for inbound channel events.
const EVENT_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Protocol types (mirror the voice endpoint's serde-tagged enums)
// ---------------------------------------------------------------------------

/// Messages sent from client to endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Handshake: announces auth, voice preset, and the uplink PCM rate.
    SessionStart {
        api_key: String,
        voice: String,
        sample_rate: u32,
    },
    /// One captured frame, base64 PCM16.
    InputAudio { audio: String },
    /// Graceful teardown.
    SessionEnd,
}

/// Messages received from the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    /// Handshake accepted; announces the model's output rate.
    SessionReady {
        #[serde(default)]
        sample_rate: Option<u32>,
    },
    /// A chunk of synthesized audio, base64 PCM16.
    AudioDelta {
        audio: String,
        #[serde(default)]
        sample_rate: Option<u32>,
    },
    /// The model detected user speech: stop local playback (barge-in).
    Interrupted,
    /// Server is done with this session.
    SessionClosed {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Server-reported error.
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Inbound events surfaced to the session controller.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Synthesized audio to schedule for playback.
    Audio {
        /// base64 PCM16 payload.
        payload: String,
        /// Model output rate, tracked independently of the capture rate.
        sample_rate: u32,
    },
    /// Barge-in: clear scheduled playback immediately.
    Interrupted,
    /// The remote side ended the session.
    Closed { reason: Option<String> },
}

/// Send half of an open streaming channel.
pub trait RealtimeChannel: Send + Sync {
    /// Hand one frame to the channel. Fire-and-forget: never blocks, and
    /// frames are dropped silently when the connection is not ready.
    fn send_frame(&self, frame: &AudioFrame);

    /// Request a graceful close. Safe to call more than once.
    fn close(&self);
}

/// Opens streaming channels. The seam lets tests substitute an in-memory
/// channel for the WebSocket implementation.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Open a channel, returning the send handle and the inbound event
    /// stream.
    async fn open(
        &self,
        config: &RealtimeConfig,
        capture_sample_rate: u32,
    ) -> Result<(Arc<dyn RealtimeChannel>, mpsc::Receiver<ChannelEvent>)>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Production connector over tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsRealtimeConnector;

struct WsRealtimeChannel {
    /// Serialized outbound messages for the background connection task.
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl RealtimeChannel for WsRealtimeChannel {
    fn send_frame(&self, frame: &AudioFrame) {
        let msg = ClientMessage::InputAudio {
            audio: BASE64.encode(&frame.pcm),
        };
        // If the receiver is dropped the connection is dead — ignore error.
        let _ = self.tx.send(msg);
    }

    fn close(&self) {
        let _ = self.tx.send(ClientMessage::SessionEnd);
    }
}

#[async_trait]
impl RealtimeConnector for WsRealtimeConnector {
    async fn open(
        &self,
        config: &RealtimeConfig,
        capture_sample_rate: u32,
    ) -> Result<(Arc<dyn RealtimeChannel>, mpsc::Receiver<ChannelEvent>)> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message};

        let url = url::Url::parse(&config.url)
            .map_err(|e| AgentError::Connection(format!("invalid realtime URL: {e}")))?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AgentError::Connection(format!("connect: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        let handshake = ClientMessage::SessionStart {
            api_key: config.resolved_api_key(),
            voice: config.voice.clone(),
            sample_rate: capture_sample_rate,
        };
        let json = serde_json::to_string(&handshake)
            .map_err(|e| AgentError::Connection(format!("encode handshake: {e}")))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| AgentError::Connection(format!("send handshake: {e}")))?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(EVENT_CHANNEL_SIZE);

        // Background task owning both WebSocket halves. Ends when the
        // server closes, the socket errors, or the channel handle asks
        // for SessionEnd; all are surfaced as ChannelEvent::Closed.
        tokio::spawn(async move {
            let mut model_rate = DEFAULT_MODEL_SAMPLE_RATE;
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = translate_server_message(&text, &mut model_rate)
                                {
                                    let closed = matches!(event, ChannelEvent::Closed { .. });
                                    if event_tx.send(event).await.is_err() || closed {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = event_tx
                                    .send(ChannelEvent::Closed { reason: None })
                                    .await;
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = event_tx
                                    .send(ChannelEvent::Closed {
                                        reason: Some(format!("read error: {e}")),
                                    })
                                    .await;
                                break;
                            }
                            _ => {} // Binary, Ping/Pong frames handled by tungstenite.
                        }
                    }
                    outbound = outbound_rx.recv() => {
                        let Some(msg) = outbound else { break };
                        let is_end = matches!(msg, ClientMessage::SessionEnd);
                        match serde_json::to_string(&msg) {
                            Ok(json) => {
                                if write.send(Message::Text(json)).await.is_err() {
                                    let _ = event_tx
                                        .send(ChannelEvent::Closed {
                                            reason: Some("send error".to_owned()),
                                        })
                                        .await;
                                    break;
                                }
                            }
                            Err(e) => debug!("dropping unserializable message: {e}"),
                        }
                        if is_end {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        });

        let channel = Arc::new(WsRealtimeChannel { tx: outbound_tx });
        Ok((channel, event_rx))
    }
}

/// Map one server message onto a channel event, tracking the announced
/// model output rate across messages. Unparseable messages are ignored.
fn translate_server_message(text: &str, model_rate: &mut u32) -> Option<ChannelEvent> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable server message: {e}");
            return None;
        }
    };

    match msg {
        ServerMessage::SessionReady { sample_rate } => {
            if let Some(rate) = sample_rate {
                *model_rate = rate;
            }
            None
        }
        ServerMessage::AudioDelta { audio, sample_rate } => Some(ChannelEvent::Audio {
            payload: audio,
            sample_rate: sample_rate.unwrap_or(*model_rate),
        }),
        ServerMessage::Interrupted => Some(ChannelEvent::Interrupted),
        ServerMessage::SessionClosed { reason } => Some(ChannelEvent::Closed { reason }),
        ServerMessage::Error { message } => {
            warn!("voice endpoint error: {message}");
            Some(ChannelEvent::Closed {
                reason: Some(message),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn client_messages_serialize_with_type_tag() {
        let msg = ClientMessage::SessionStart {
            api_key: "k".to_owned(),
            voice: "sol".to_owned(),
            sample_rate: 24_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"session_start\""));
        assert!(json.contains("\"sample_rate\":24000"));

        let msg = ClientMessage::InputAudio {
            audio: "AAAA".to_owned(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"input_audio\""));
    }

    #[test]
    fn audio_delta_uses_announced_model_rate() {
        let mut rate = DEFAULT_MODEL_SAMPLE_RATE;
        let ready = r#"{"type":"session_ready","sample_rate":16000}"#;
        assert!(translate_server_message(ready, &mut rate).is_none());
        assert_eq!(rate, 16_000);

        let delta = r#"{"type":"audio_delta","audio":"AAAA"}"#;
        let event = translate_server_message(delta, &mut rate).unwrap();
        assert!(matches!(
            event,
            ChannelEvent::Audio { sample_rate: 16_000, .. }
        ));
    }

    #[test]
    fn audio_delta_rate_override_wins() {
        let mut rate = DEFAULT_MODEL_SAMPLE_RATE;
        let delta = r#"{"type":"audio_delta","audio":"AAAA","sample_rate":8000}"#;
        let event = translate_server_message(delta, &mut rate).unwrap();
        assert!(matches!(
            event,
            ChannelEvent::Audio { sample_rate: 8_000, .. }
        ));
    }

    #[test]
    fn interrupt_and_close_translate() {
        let mut rate = DEFAULT_MODEL_SAMPLE_RATE;
        let event = translate_server_message(r#"{"type":"interrupted"}"#, &mut rate).unwrap();
        assert!(matches!(event, ChannelEvent::Interrupted));

        let event = translate_server_message(
            r#"{"type":"session_closed","reason":"idle timeout"}"#,
            &mut rate,
        )
        .unwrap();
        assert!(
            matches!(event, ChannelEvent::Closed { reason: Some(r) } if r == "idle timeout")
        );
    }

    #[test]
    fn server_error_closes_the_channel() {
        let mut rate = DEFAULT_MODEL_SAMPLE_RATE;
        let event =
            translate_server_message(r#"{"type":"error","message":"bad key"}"#, &mut rate).unwrap();
        assert!(matches!(event, ChannelEvent::Closed { reason: Some(r) } if r == "bad key"));
    }

    #[test]
    fn garbage_messages_are_ignored() {
        let mut rate = DEFAULT_MODEL_SAMPLE_RATE;
        assert!(translate_server_message("not json", &mut rate).is_none());
        assert!(translate_server_message(r#"{"type":"unknown_kind"}"#, &mut rate).is_none());
    }
}
