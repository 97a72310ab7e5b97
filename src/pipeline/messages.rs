//! Message types passed between the session stages and the pipeline.

use crate::backend::ActionPlan;

/// Fixed user-visible message for otherwise-uncaught pipeline failures.
pub const PROCESSING_ERROR_MESSAGE: &str = "An error occurred during processing";

/// One encoded block of captured microphone audio, ready for the wire.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Little-endian 16-bit PCM payload.
    pub pcm: Vec<u8>,
    /// Number of samples encoded in `pcm`.
    pub samples: usize,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// RMS loudness of the block, scaled to [0, 1] for a UI meter.
    pub loudness: f32,
}

impl AudioFrame {
    /// Frame duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples as f32 / self.sample_rate as f32
    }
}

/// One user turn handed to the pipeline.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// The utterance text.
    pub text: String,
    /// Wallet address the turn acts on behalf of.
    pub address: String,
    /// Backend user id for generation context.
    pub user_id: String,
    /// Optional attached image payload (base64) for the general-answer
    /// stage.
    pub image_base64: Option<String>,
}

/// The single terminal outcome of one pipeline turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// An executable action proposal. Producing one suppresses the
    /// general-answer path for the turn.
    Action(ActionPlan),
    /// A plain general answer.
    Answer(String),
    /// Fixed error message; the conversation remains usable.
    Failed(String),
}

impl TurnOutcome {
    /// Text shown to the user for this outcome.
    pub fn display_text(&self) -> &str {
        match self {
            Self::Action(plan) => &plan.summary,
            Self::Answer(text) => text,
            Self::Failed(message) => message,
        }
    }
}
