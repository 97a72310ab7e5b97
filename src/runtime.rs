//! Runtime events emitted by the agent for UI and observability.
//!
//! This is intentionally lightweight (no heavy payloads) so the session
//! can emit events without blocking critical audio paths.

use crate::progress::ThinkingStep;
use crate::session::SessionState;

/// Events that describe what the agent is doing "right now".
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Voice session state change.
    SessionState(SessionState),
    /// User-facing message for a session failure (permission denial,
    /// connection loss). Emitted alongside the `Error` state.
    SessionMessage { text: String },
    /// Per-frame microphone loudness in [0, 1], for a UI level meter.
    MicLevel { loudness: f32 },
    /// Snapshot of the thinking steps after a tracker mutation.
    Thinking { steps: Vec<ThinkingStep> },
    /// The pipeline proposed a wallet action for this turn.
    ActionProposed { summary: String },
    /// The pipeline produced a general answer for this turn.
    Answer { text: String },
}
