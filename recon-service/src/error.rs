//! Service-level error type

use recon_core::ingest::FileRejection;
use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Service errors
#[derive(Error, Debug)]
pub enum Error {
    /// One or more uploaded files failed validation
    #[error("Upload rejected: {} invalid file(s)", .0.len())]
    UploadRejected(Vec<FileRejection>),

    /// Caller exceeded the rate limit for heavyweight operations
    #[error("Rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Core error
    #[error(transparent)]
    Core(#[from] recon_core::Error),

    /// Matching error
    #[error(transparent)]
    Matching(#[from] matching::Error),

    /// Settlement error
    #[error(transparent)]
    Settlement(#[from] settlement::Error),

    /// Control error
    #[error(transparent)]
    Controls(#[from] controls::Error),

    /// Audit error
    #[error(transparent)]
    Audit(#[from] audit::AuditError),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The rejections behind an UploadRejected error
    pub fn rejections(&self) -> Option<&[FileRejection]> {
        match self {
            Error::UploadRejected(rejections) => Some(rejections),
            _ => None,
        }
    }
}
