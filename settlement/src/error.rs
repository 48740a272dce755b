//! Error types for settlement and report generation

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Voucher validation failure
    #[error("Voucher error: {0}")]
    Voucher(String),

    /// Report generation failure
    #[error("Report error: {0}")]
    Report(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] recon_core::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(String),

    /// XLSX generation error
    #[error("XLSX error: {0}")]
    Xlsx(String),

    /// ZIP bundling error
    #[error("ZIP error: {0}")]
    Zip(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Error::Xlsx(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Zip(err.to_string())
    }
}
