//! Error types for control operations

use thiserror::Error;

/// Result type for control operations
pub type Result<T> = std::result::Result<T, Error>;

/// Control errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Absent run, proposal or artifact
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted in the current state
    #[error("Invalid state: {0}")]
    State(String),

    /// Concurrent or self-approving mutation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] recon_core::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
