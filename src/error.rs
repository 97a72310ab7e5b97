//! Error types for the vela agent.

/// Top-level error type for the voice and action agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone permission denied by the platform.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Realtime channel connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound audio chunk. Recoverable: the chunk is dropped.
    #[error("decode error: {0}")]
    Decode(String),

    /// Intent parsing error.
    #[error("intent error: {0}")]
    Intent(String),

    /// Transaction optimizer error. Recoverable: the pipeline falls back
    /// to the basic resolver within the same stage.
    #[error("optimizer error: {0}")]
    Optimize(String),

    /// Action resolver error. Recoverable: the pipeline falls through to
    /// the general-answer stage.
    #[error("resolver error: {0}")]
    Resolve(String),

    /// Text or speech generation error.
    #[error("generation error: {0}")]
    Generate(String),

    /// Conversation persistence error. Logged, never surfaced to the user.
    #[error("persistence error: {0}")]
    Persist(String),

    /// Session lifecycle error.
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AgentError>;
