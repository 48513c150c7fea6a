//! Error types for readaloud

use thiserror::Error;

/// Result type alias for readaloud operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming a document aloud
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech backend error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Operation not valid in the current session state
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The session controller task is gone
    #[error("session controller closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
