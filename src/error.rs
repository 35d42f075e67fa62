//! Error types for the interview server.

/// Top-level error type for the interview session system.
#[derive(Debug, thiserror::Error)]
pub enum InterviewError {
    /// Bearer credential verification failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Message channel send/receive error (client transport).
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Question bank loading or validation error.
    #[error("question bank error: {0}")]
    Bank(String),

    /// Language model call error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Interview block storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Session orchestration error.
    #[error("session error: {0}")]
    Session(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, InterviewError>;
