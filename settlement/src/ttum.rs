//! TTUM instruction file generation.
//!
//! One CSV per category (DRC, RRC, TCC, RET, RECOVERY, REFUND) with a
//! fixed header set, plus the consolidated Annexure-IV rows. GL mapping
//! defaults flow from the settlement GL configuration; an optional
//! issuer-action table can override the credit GL per RRN and suppress
//! REFUND/RECOVERY rows entirely.

use crate::annexure::AnnexureRecord;
use crate::error::Result;
use chrono::NaiveDate;
use recon_core::config::GlConfig;
use recon_core::types::{DrCr, ReconOutput, ReconRecord, ReconStatus, SourceLeg, TccCode, TtumCategory};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TTUM_HEADERS: [&str; 14] = [
    "InstructionType",
    "InstructionRefNo",
    "RRN",
    "Amount",
    "ValueDate",
    "DrCr",
    "RC",
    "Tran_Type",
    "AccountNo",
    "IFSC",
    "Narration",
    "TTUM_Code",
    "GL_Debit_Account",
    "GL_Credit_Account",
];

/// Issuer-provided action for one RRN
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuerAction {
    pub action_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outward_payable: Option<String>,
}

impl IssuerAction {
    fn action_lower(&self) -> String {
        self.action_point.to_lowercase()
    }

    /// Issuer explicitly told us to leave this RRN alone
    fn suppresses(&self) -> bool {
        let action = self.action_lower();
        ["ignore", "no action", "hanging", "hang", "matched", "both leg present"]
            .iter()
            .any(|token| action.contains(token))
    }
}

/// One TTUM instruction row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtumRow {
    pub instruction_type: String,
    pub instruction_ref_no: String,
    pub rrn: String,
    pub amount: Decimal,
    pub value_date: String,
    pub dr_cr: String,
    pub rc: String,
    pub tran_type: String,
    pub account_no: String,
    pub ifsc: String,
    pub narration: String,
    pub ttum_code: String,
    pub gl_debit_account: String,
    pub gl_credit_account: String,
}

impl TtumRow {
    pub fn fields(&self) -> [String; 14] {
        [
            self.instruction_type.clone(),
            self.instruction_ref_no.clone(),
            self.rrn.clone(),
            self.amount.to_string(),
            self.value_date.clone(),
            self.dr_cr.clone(),
            self.rc.clone(),
            self.tran_type.clone(),
            self.account_no.clone(),
            self.ifsc.clone(),
            self.narration.clone(),
            self.ttum_code.clone(),
            self.gl_debit_account.clone(),
            self.gl_credit_account.clone(),
        ]
    }
}

/// Generated TTUM rows plus the Annexure-IV consolidation
#[derive(Debug, Default)]
pub struct TtumSet {
    pub rows: BTreeMap<TtumCategory, Vec<TtumRow>>,
    pub annexure: Vec<AnnexureRecord>,
}

impl TtumSet {
    pub fn total_rows(&self) -> usize {
        self.rows.values().map(|rows| rows.len()).sum()
    }
}

/// Statuses DRC/RRC/REFUND/RECOVERY apply to
const ADJUSTABLE_STATUSES: [ReconStatus; 3] = [
    ReconStatus::Orphan,
    ReconStatus::PartialMatch,
    ReconStatus::Mismatch,
];

/// TTUM generator
pub struct TtumGenerator {
    gl: GlConfig,
    issuer_actions: BTreeMap<String, IssuerAction>,
}

impl TtumGenerator {
    pub fn new(gl: GlConfig) -> Self {
        Self {
            gl,
            issuer_actions: BTreeMap::new(),
        }
    }

    pub fn with_issuer_actions(mut self, actions: BTreeMap<String, IssuerAction>) -> Self {
        self.issuer_actions = actions;
        self
    }

    /// Produce all category rows and Annexure records for one run
    pub fn generate(&self, output: &ReconOutput, today: NaiveDate) -> TtumSet {
        let mut set = TtumSet::default();
        for category in TtumCategory::ALL {
            set.rows.insert(category, Vec::new());
        }
        let mut annexure_seq = 0usize;

        for category in TtumCategory::ALL {
            for (rrn, record) in &output.records {
                if !self.category_applies(category, rrn, record) {
                    continue;
                }
                let row = self.build_row(category, rrn, record);

                annexure_seq += 1;
                set.annexure.push(AnnexureRecord::new(
                    format!("BR_{}_{}_{}", category, rrn, annexure_seq),
                    category.annexure_flag(),
                    value_date(record),
                    row.amount,
                    rrn,
                    &format!("{}.csv", category.as_str().to_lowercase()),
                    &row.rc,
                    &row.narration,
                    today,
                ));

                set.rows
                    .get_mut(&category)
                    .expect("category preinitialized")
                    .push(row);
            }
        }

        tracing::info!(rows = set.total_rows(), annexure = set.annexure.len(), "TTUM generation complete");
        set
    }

    fn issuer_action(&self, rrn: &str) -> Option<&IssuerAction> {
        self.issuer_actions.get(rrn)
    }

    fn category_applies(&self, category: TtumCategory, rrn: &str, record: &ReconRecord) -> bool {
        match category {
            TtumCategory::Tcc => record.tcc == Some(TccCode::Tcc103),
            TtumCategory::Ret => record.needs_ttum || record.status == ReconStatus::Exception,
            TtumCategory::Drc => {
                ADJUSTABLE_STATUSES.contains(&record.status)
                    && leg_dr_cr(record) != Some(DrCr::Credit)
            }
            TtumCategory::Rrc => {
                ADJUSTABLE_STATUSES.contains(&record.status)
                    && leg_dr_cr(record) == Some(DrCr::Credit)
            }
            TtumCategory::Refund => {
                if !ADJUSTABLE_STATUSES.contains(&record.status) {
                    return false;
                }
                match self.issuer_action(rrn) {
                    Some(action) if action.suppresses() => false,
                    Some(action) => {
                        let lower = action.action_lower();
                        // Refund is the default when the issuer is silent
                        lower.contains("refund") || !lower.contains("recovery")
                    }
                    None => true,
                }
            }
            TtumCategory::Recovery => {
                if !ADJUSTABLE_STATUSES.contains(&record.status) {
                    return false;
                }
                match self.issuer_action(rrn) {
                    Some(action) if action.suppresses() => false,
                    Some(action) => action.action_lower().contains("recovery"),
                    None => false,
                }
            }
        }
    }

    fn build_row(&self, category: TtumCategory, rrn: &str, record: &ReconRecord) -> TtumRow {
        let leg = record.primary_leg();
        let amount = leg.map(|leg| leg.amount).unwrap_or(Decimal::ZERO);
        let dr_cr = leg
            .and_then(|leg| leg.dr_cr)
            .map(|d| d.as_str().to_string())
            .unwrap_or_default();
        let rc = leg.map(|leg| leg.rc.clone()).unwrap_or_default();
        let tran_type = leg.map(|leg| leg.tran_type.clone()).unwrap_or_default();
        let value_date = value_date(record)
            .map(|date| date.format("%Y%m%d").to_string())
            .unwrap_or_default();

        let (gl_debit, gl_credit) = self.gl_accounts(category, rrn, record);

        TtumRow {
            instruction_type: category.as_str().to_string(),
            instruction_ref_no: format!("TTUM_{}_{}", category, rrn),
            rrn: rrn.to_string(),
            amount,
            value_date,
            dr_cr,
            rc,
            tran_type,
            account_no: String::new(),
            ifsc: String::new(),
            narration: format!("{} for {}", category, rrn),
            ttum_code: category.as_str().to_string(),
            gl_debit_account: gl_debit,
            gl_credit_account: gl_credit,
        }
    }

    /// Category-specific GL orientation, with the issuer's outward GL as a
    /// credit-side override where provided
    fn gl_accounts(&self, category: TtumCategory, rrn: &str, record: &ReconRecord) -> (String, String) {
        let suspense = self.gl.suspense_account.code.clone();
        let payable = self.gl.settlement_payable.code.clone();
        let receivable = self.gl.settlement_receivable.code.clone();
        let bank = self.gl.bank_account.code.clone();

        let issuer_credit = self
            .issuer_action(rrn)
            .and_then(|action| action.outward_payable.clone())
            .filter(|gl| !gl.trim().is_empty());

        let (debit, credit) = match category {
            TtumCategory::Refund => (payable.clone(), bank.clone()),
            TtumCategory::Recovery => (bank, receivable),
            TtumCategory::Tcc => (suspense.clone(), payable.clone()),
            TtumCategory::Ret => (suspense.clone(), payable.clone()),
            TtumCategory::Drc | TtumCategory::Rrc => match leg_dr_cr(record) {
                Some(DrCr::Debit) => (payable, suspense),
                _ => (suspense, payable),
            },
        };

        match issuer_credit {
            Some(gl) => (debit, gl),
            None => (debit, credit),
        }
    }
}

fn leg_dr_cr(record: &ReconRecord) -> Option<DrCr> {
    record.primary_leg().and_then(|leg: &SourceLeg| leg.dr_cr)
}

fn value_date(record: &ReconRecord) -> Option<NaiveDate> {
    record.primary_leg().map(|leg| leg.date.date())
}

/// Render one category's rows as CSV bytes
pub fn to_csv_bytes(rows: &[TtumRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TTUM_HEADERS)?;
    for row in rows {
        writer.write_record(row.fields())?;
    }
    writer
        .into_inner()
        .map_err(|e| crate::Error::Csv(e.to_string()))
}
