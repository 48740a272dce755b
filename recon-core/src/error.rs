//! Error types for the reconciliation core

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
///
/// The variants mirror how failures are surfaced to callers: validation
/// failures reject the offending input, not-found and state errors are
/// returned to the caller with a hint, and processing errors are captured
/// per record without aborting the run.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected with a structured message
    #[error("Validation error: {0}")]
    Validation(String),

    /// Absent run, cycle or report
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted in the current state
    #[error("Invalid state: {0}")]
    State(String),

    /// Concurrent mutation attempt; the caller should retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Single-record failure inside matching
    #[error("Processing error: {0}")]
    Processing(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

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

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Validation(format!("CSV parse failed: {}", err))
    }
}
