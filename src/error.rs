//! Error types for Storyplay

use thiserror::Error;

/// Result type alias for Storyplay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Storyplay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Settings validation or persistence error
    #[error("settings error: {0}")]
    Settings(String),

    /// Story generation or decoding error
    #[error("story error: {0}")]
    Story(String),

    /// Narration synthesis error
    #[error("narration error: {0}")]
    Narration(String),

    /// Audio decode or output error
    #[error("audio error: {0}")]
    Audio(String),

    /// Camera acquisition error (permission denied, no device)
    #[error("camera error: {0}")]
    Camera(String),

    /// Perception model error (load or inference)
    #[error("perception error: {0}")]
    Perception(String),

    /// Speech recognition error
    #[error("speech error: {0}")]
    Speech(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base64 payload error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
