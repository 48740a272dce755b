//! Settlement accounting and TTUM generation.
//!
//! Turns reconciliation output into accounting vouchers with balanced GL
//! entries, NPCI-bound TTUM instruction files per category, the
//! consolidated Annexure-IV adjustment CSV, and the run's report suite.

pub mod annexure;
pub mod engine;
pub mod error;
pub mod reports;
pub mod ttum;
pub mod types;

pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use ttum::TtumGenerator;
