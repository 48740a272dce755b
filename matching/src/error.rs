//! Error types for the matching engine

use thiserror::Error;

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, Error>;

/// Matching errors
#[derive(Error, Debug)]
pub enum Error {
    /// Combined input holds no transaction rows; the run is aborted
    #[error("No transaction records to reconcile: {0}")]
    EmptyInput(String),

    /// Core error (persistence, validation)
    #[error("Core error: {0}")]
    Core(#[from] recon_core::Error),

    /// Single-record failure; captured per RRN, never aborts the run
    #[error("Processing error: {0}")]
    Processing(String),
}
