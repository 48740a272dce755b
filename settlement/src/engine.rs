//! Settlement accounting engine.
//!
//! Generates vouchers and GL entries from reconciled transactions and posts
//! them with balance validation. Every MATCHED record yields a PAYMENT
//! voucher; PARTIAL_MATCH and ORPHAN records with a positive amount yield
//! SETTLEMENT vouchers against suspense.

use crate::error::Result;
use crate::types::{
    AccountingOutput, AccountingSummary, AccountingVoucher, GlEntry, PostingReport, Voucher,
    VoucherStatus, VoucherType, VOUCHER_GENERATED,
};
use chrono::{DateTime, Utc};
use recon_core::config::{GlAccount, GlConfig};
use recon_core::types::{ReconOutput, ReconRecord, ReconStatus};
use rust_decimal::Decimal;

/// Outcome of voucher generation for one run
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub vouchers_generated: usize,
    pub matched_count: usize,
    pub settlement_count: usize,
    pub total_amount: Decimal,
}

/// Settlement engine
pub struct SettlementEngine {
    gl: GlConfig,
    amount_tolerance: Decimal,
    voucher_counter: u64,
    entry_counter: u64,
    vouchers: Vec<Voucher>,
}

impl SettlementEngine {
    pub fn new(gl: GlConfig, amount_tolerance: Decimal) -> Self {
        Self {
            gl,
            amount_tolerance,
            voucher_counter: 0,
            entry_counter: 0,
            vouchers: Vec::new(),
        }
    }

    pub fn vouchers(&self) -> &[Voucher] {
        &self.vouchers
    }

    fn next_voucher_id(&mut self, prefix: &str) -> String {
        self.voucher_counter += 1;
        format!("{}_{:06}", prefix, self.voucher_counter)
    }

    fn next_entry_id(&mut self) -> String {
        self.entry_counter += 1;
        format!("GL_{:08}", self.entry_counter)
    }

    fn gl_entry(
        &mut self,
        account: &GlAccount,
        debit: Decimal,
        credit: Decimal,
        description: String,
        rrn: &str,
    ) -> GlEntry {
        GlEntry {
            entry_id: self.next_entry_id(),
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            debit_amount: debit,
            credit_amount: credit,
            description,
            reference: format!("RRN:{}", rrn),
        }
    }

    /// Generate vouchers from reconciliation output
    pub fn generate_vouchers(
        &mut self,
        output: &ReconOutput,
        now: DateTime<Utc>,
    ) -> Result<GenerationReport> {
        tracing::info!(run_id = %output.run_id, "generating vouchers");

        let mut report = GenerationReport::default();

        for (rrn, record) in &output.records {
            match record.status {
                ReconStatus::Matched | ReconStatus::ForceMatched => {
                    if let Some(voucher) = self.create_payment_voucher(rrn, record, now) {
                        report.total_amount += voucher.amount;
                        report.matched_count += 1;
                        report.vouchers_generated += 1;
                        self.vouchers.push(voucher);
                    }
                }
                ReconStatus::PartialMatch | ReconStatus::Orphan => {
                    if let Some(voucher) = self.create_settlement_voucher(rrn, record, now) {
                        report.total_amount += voucher.amount;
                        report.settlement_count += 1;
                        report.vouchers_generated += 1;
                        self.vouchers.push(voucher);
                    }
                }
                _ => {}
            }
        }

        tracing::info!(
            run_id = %output.run_id,
            vouchers = report.vouchers_generated,
            total = %report.total_amount,
            "voucher generation complete"
        );

        Ok(report)
    }

    /// PAYMENT voucher: debit Bank Account, credit Settlement Receivable,
    /// amount taken from the CBS leg
    fn create_payment_voucher(
        &mut self,
        rrn: &str,
        record: &ReconRecord,
        now: DateTime<Utc>,
    ) -> Option<Voucher> {
        let leg = record.cbs.as_ref()?;
        let amount = leg.amount;
        if amount <= Decimal::ZERO {
            return None;
        }

        let voucher_id = self.next_voucher_id("VOUCHER");
        let bank = self.gl.bank_account.clone();
        let receivable = self.gl.settlement_receivable.clone();

        let gl_entries = vec![
            self.gl_entry(
                &bank,
                amount,
                Decimal::ZERO,
                format!("Payment received - RRN {}", rrn),
                rrn,
            ),
            self.gl_entry(
                &receivable,
                Decimal::ZERO,
                amount,
                format!("Settlement receivable - RRN {}", rrn),
                rrn,
            ),
        ];

        Some(Voucher {
            voucher_id,
            voucher_type: VoucherType::Payment,
            rrn: Some(rrn.to_string()),
            transaction_date: leg.date.format("%Y-%m-%d").to_string(),
            amount,
            description: format!("Payment voucher for matched transaction RRN {}", rrn),
            status: VoucherStatus::Generated,
            created_at: now,
            posted_at: None,
            gl_entries,
        })
    }

    /// SETTLEMENT voucher: debit Suspense, credit Settlement Payable,
    /// amount taken from the first populated leg
    fn create_settlement_voucher(
        &mut self,
        rrn: &str,
        record: &ReconRecord,
        now: DateTime<Utc>,
    ) -> Option<Voucher> {
        let leg = record.primary_leg()?;
        let amount = leg.amount;
        if amount <= Decimal::ZERO {
            return None;
        }
        let date = leg.date;

        let voucher_id = self.next_voucher_id("SETTLE");
        let suspense = self.gl.suspense_account.clone();
        let payable = self.gl.settlement_payable.clone();

        let gl_entries = vec![
            self.gl_entry(
                &suspense,
                amount,
                Decimal::ZERO,
                format!("Unmatched transaction - RRN {}", rrn),
                rrn,
            ),
            self.gl_entry(
                &payable,
                Decimal::ZERO,
                amount,
                format!("Settlement payable - RRN {}", rrn),
                rrn,
            ),
        ];

        Some(Voucher {
            voucher_id,
            voucher_type: VoucherType::Settlement,
            rrn: Some(rrn.to_string()),
            transaction_date: date.format("%Y-%m-%d").to_string(),
            amount,
            description: format!("Settlement voucher for unmatched transaction RRN {}", rrn),
            status: VoucherStatus::Generated,
            created_at: now,
            posted_at: None,
            gl_entries,
        })
    }

    /// Post generated vouchers to the GL.
    ///
    /// An unbalanced voucher is marked FAILED; other vouchers keep posting.
    pub fn post_vouchers(&mut self, voucher_ids: Option<&[String]>, now: DateTime<Utc>) -> PostingReport {
        let tolerance = self.amount_tolerance;
        let mut report = PostingReport::default();

        for voucher in self.vouchers.iter_mut() {
            let targeted = match voucher_ids {
                Some(ids) => ids.iter().any(|id| id == &voucher.voucher_id),
                None => voucher.status == VoucherStatus::Generated,
            };
            if !targeted {
                continue;
            }
            report.total_attempted += 1;

            if voucher.is_balanced(tolerance) {
                voucher.status = VoucherStatus::Posted;
                voucher.posted_at = Some(now);
                report.posted_count += 1;
                tracing::info!(voucher_id = %voucher.voucher_id, "posted voucher to GL");
            } else {
                voucher.status = VoucherStatus::Failed;
                report.failed_count += 1;
                tracing::error!(
                    voucher_id = %voucher.voucher_id,
                    debit = %voucher.debit_total(),
                    credit = %voucher.credit_total(),
                    "voucher is not balanced"
                );
            }
        }

        report
    }

    /// Build the `accounting_output.json` document
    pub fn accounting_output(&self, run_id: &str, now: DateTime<Utc>) -> AccountingOutput {
        let vouchers: Vec<AccountingVoucher> = self
            .vouchers
            .iter()
            .map(|voucher| AccountingVoucher {
                voucher_id: voucher.voucher_id.clone(),
                voucher_type: voucher.voucher_type,
                rrn: voucher.rrn.clone(),
                amount: voucher.amount,
                status: VOUCHER_GENERATED.to_string(),
                gl_entries: voucher.gl_entries.clone(),
                previous_status: None,
                rollback_metadata: None,
            })
            .collect();

        let summary = AccountingSummary {
            total_vouchers: vouchers.len(),
            matched_transactions: self
                .vouchers
                .iter()
                .filter(|v| v.voucher_type == VoucherType::Payment)
                .count(),
            settlement_transactions: self
                .vouchers
                .iter()
                .filter(|v| v.voucher_type == VoucherType::Settlement)
                .count(),
            total_amount: self.vouchers.iter().map(|v| v.amount).sum(),
        };

        AccountingOutput {
            run_id: run_id.to_string(),
            generated_at: now,
            summary,
            vouchers,
            accounting_status: None,
        }
    }
}
