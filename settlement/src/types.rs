//! Voucher and accounting output types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status string the accounting output uses for freshly generated
/// vouchers; the accounting rollback targets exactly this value
pub const VOUCHER_GENERATED: &str = "voucher_generated";

/// Status string a rolled-back voucher is reset to
pub const MATCHED_PENDING: &str = "matched/pending";

/// Types of accounting vouchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherType {
    /// Customer payments
    Payment,
    /// Transaction reversals
    Reversal,
    /// Manual adjustments
    Adjustment,
    /// Settlement entries
    Settlement,
}

impl fmt::Display for VoucherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoucherType::Payment => "PAYMENT",
            VoucherType::Reversal => "REVERSAL",
            VoucherType::Adjustment => "ADJUSTMENT",
            VoucherType::Settlement => "SETTLEMENT",
        };
        write!(f, "{}", s)
    }
}

/// Status of voucher processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    /// Voucher created
    Generated,
    /// Posted to GL
    Posted,
    /// Posting failed
    Failed,
    /// Voucher reversed
    Reversed,
}

/// A general ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlEntry {
    pub entry_id: String,
    pub account_code: String,
    pub account_name: String,
    #[serde(default)]
    pub debit_amount: Decimal,
    #[serde(default)]
    pub credit_amount: Decimal,
    pub description: String,
    pub reference: String,
}

/// An accounting voucher with its GL entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub voucher_id: String,
    pub voucher_type: VoucherType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrn: Option<String>,
    pub transaction_date: String,
    pub amount: Decimal,
    pub description: String,
    pub status: VoucherStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    pub gl_entries: Vec<GlEntry>,
}

impl Voucher {
    pub fn debit_total(&self) -> Decimal {
        self.gl_entries.iter().map(|entry| entry.debit_amount).sum()
    }

    pub fn credit_total(&self) -> Decimal {
        self.gl_entries.iter().map(|entry| entry.credit_amount).sum()
    }

    /// Debit total must equal credit total within the tolerance
    pub fn is_balanced(&self, tolerance: Decimal) -> bool {
        (self.debit_total() - self.credit_total()).abs() <= tolerance
    }
}

/// Posting results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostingReport {
    pub posted_count: usize,
    pub failed_count: usize,
    pub total_attempted: usize,
}

/// Voucher rendition persisted in `accounting_output.json`.
///
/// Status is a free string here: generation writes `voucher_generated`
/// and the accounting rollback rewrites it to `matched/pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingVoucher {
    pub voucher_id: String,
    pub voucher_type: VoucherType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrn: Option<String>,
    pub amount: Decimal,
    pub status: String,
    pub gl_entries: Vec<GlEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_metadata: Option<serde_json::Value>,
}

/// Summary block of the accounting output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountingSummary {
    pub total_vouchers: usize,
    pub matched_transactions: usize,
    pub settlement_transactions: usize,
    pub total_amount: Decimal,
}

/// The `accounting_output.json` document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingOutput {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: AccountingSummary,
    pub vouchers: Vec<AccountingVoucher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounting_status: Option<serde_json::Value>,
}
