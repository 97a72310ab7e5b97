//! Vela: real-time voice and action agent for the VCN wallet.
//!
//! This crate provides the two engineering cores of the wallet assistant:
//!
//! - **Live voice session**: Microphone → encoder → realtime channel →
//!   remote model → gapless playback, with barge-in interruption.
//! - **Action pipeline**: utterance → intent parsing → transaction
//!   optimization → generic resolution → general answer, as an ordered
//!   fallback chain producing exactly one outcome per turn.
//!
//! # Architecture
//!
//! Components are independent stages connected by async channels:
//! - **Audio capture**: Records and encodes frames via `cpal`
//! - **Realtime channel**: Streams PCM16 both ways over WebSocket
//! - **Playback**: Schedules inbound chunks gaplessly via `cpal`
//! - **Pipeline**: Resolves utterances against the wallet backend
//! - **Progress**: Thinking-step feedback for UIs

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod runtime;
pub mod session;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use pipeline::messages::{TurnOutcome, TurnRequest};
pub use pipeline::{IntentActionPipeline, PipelineCollaborators};
pub use progress::{StepStatus, ThinkingProgressTracker, ThinkingStep};
pub use runtime::AgentEvent;
pub use session::{SessionLifecycleController, SessionState};
