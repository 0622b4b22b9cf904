//! Error types for the TTS daemon.

/// Top-level error type for the daemon and its components.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// Audio device or playback error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Cache read/write error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Configuration document could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Remote speech service transport error (handshake, mid-stream failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A synthesis turn completed with no audio chunks.
    #[error("synthesis produced no audio: {0}")]
    Synthesis(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal startup condition; the process should exit 1.
    #[error("{0}")]
    Fatal(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TtsError>;
