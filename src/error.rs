//! Error types for the DriveAssist voice session

use thiserror::Error;

/// Result type alias for DriveAssist operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access refused or no input device
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Remote connection failed to open or closed unexpectedly
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed wire payload (base64 or PCM framing)
    #[error("decode error: {0}")]
    Decode(String),

    /// Local tool action failed
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Phone number could not be used for dialing
    #[error("invalid phone number: {0}")]
    InvalidNumber(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
