//! Error types for Island Core

use thiserror::Error;

/// Result type alias using Island Error
pub type Result<T> = std::result::Result<T, Error>;

/// Island error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is shut down")]
    EngineShutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
