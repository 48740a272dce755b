//! Transport-agnostic reconciliation service.
//!
//! Wires the pipeline end to end: ingestion, run store, matching engine,
//! settlement artifacts, maker–checker, rollback and audit trail. Every
//! canonical operation is a typed async method; the HTTP layer that exposes
//! them lives elsewhere.

pub mod error;
pub mod service;

pub use error::{Error, Result};
pub use service::{
    ReconService, ReconcileResponse, ReportFile, ReportKind, RunSummaryDoc, TtumFormat,
    TtumResponse, UploadRequest, UploadResponse,
};

/// Install the default tracing subscriber (env-filtered, for binaries and
/// integration tests)
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
