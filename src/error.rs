//! Error types for habla

use thiserror::Error;

/// Result type alias for habla operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in habla
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied or no input device available.
    /// Terminal until the user acts; never auto-retried.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Reply generation error
    #[error("chat error: {0}")]
    Chat(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Reply stream fault (network or backend, mid-stream)
    #[error("stream error: {0}")]
    Stream(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
