//! Error types for the anomaly engine

use thiserror::Error;

/// Result type for scoring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Anomaly engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Feature extraction error
    #[error("Feature error: {0}")]
    Feature(String),

    /// External scorer unreachable or returned garbage
    #[error("Scorer unavailable: {0}")]
    ScorerUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
