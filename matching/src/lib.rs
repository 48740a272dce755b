//! UPI matching engine.
//!
//! Executes the ordered eight-pass matching state machine over the CBS,
//! Switch and NPCI datasets of one cycle, classifies residual records via
//! the exception matrix and the short-form classification rule, and emits
//! one reconciliation record per RRN group.
//!
//! The passes run strictly in order; a later pass never reclassifies a row
//! an earlier pass marked as processed. All candidate selection is
//! deterministic: candidates are ordered by `(tran_date, rrn, amount, seq)`
//! before the first is taken.

pub mod classify;
pub mod configs;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod prior_cycle;
pub mod types;

pub use engine::{MatchInputs, MatchingSettings, UpiMatchingEngine};
pub use error::{Error, Result};
pub use prior_cycle::{MapPriorCycles, NoPriorCycles, PriorCycleLookup, StorePriorCycles};
