//! Canonical types shared across the reconciliation pipeline

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Authoritative source a transaction row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Cbs,
    Switch,
    Npci,
    Ntsl,
}

impl Source {
    /// Infer the source from filename tokens
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("cbs") {
            Some(Source::Cbs)
        } else if lower.contains("switch") {
            Some(Source::Switch)
        } else if lower.contains("npci") {
            Some(Source::Npci)
        } else if lower.contains("ntsl") || lower.contains("national") {
            Some(Source::Ntsl)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cbs => "CBS",
            Source::Switch => "SWITCH",
            Source::Npci => "NPCI",
            Source::Ntsl => "NTSL",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction flow direction relative to the bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inward,
    Outward,
}

impl Direction {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("inward") {
            Some(Direction::Inward)
        } else if lower.contains("outward") {
            Some(Direction::Outward)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inward => "INWARD",
            Direction::Outward => "OUTWARD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Debit/credit indicator on a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrCr {
    #[serde(rename = "D")]
    Debit,
    #[serde(rename = "C")]
    Credit,
}

impl DrCr {
    /// Parse the many spellings source files use (`D`, `DR`, `DEBIT`, ...)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "D" | "DR" | "DEBIT" => Some(DrCr::Debit),
            "C" | "CR" | "CREDIT" => Some(DrCr::Credit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrCr::Debit => "D",
            DrCr::Credit => "C",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            DrCr::Debit => DrCr::Credit,
            DrCr::Credit => DrCr::Debit,
        }
    }
}

/// Upload slot a file was submitted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSlot {
    CbsInward,
    CbsOutward,
    Switch,
    NpciInward,
    NpciOutward,
    Ntsl,
    Adjustment,
}

impl FileSlot {
    pub const ALL: [FileSlot; 7] = [
        FileSlot::CbsInward,
        FileSlot::CbsOutward,
        FileSlot::Switch,
        FileSlot::NpciInward,
        FileSlot::NpciOutward,
        FileSlot::Ntsl,
        FileSlot::Adjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileSlot::CbsInward => "cbs_inward",
            FileSlot::CbsOutward => "cbs_outward",
            FileSlot::Switch => "switch",
            FileSlot::NpciInward => "npci_inward",
            FileSlot::NpciOutward => "npci_outward",
            FileSlot::Ntsl => "ntsl",
            FileSlot::Adjustment => "adjustment",
        }
    }

    /// Infer the slot from filename tokens, most specific first
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let has = |t: &str| lower.contains(t);
        if has("cbs") {
            if has("inward") || has("inw") {
                return Some(FileSlot::CbsInward);
            }
            return Some(FileSlot::CbsOutward);
        }
        if has("switch") {
            return Some(FileSlot::Switch);
        }
        if has("npci") {
            if has("inward") || has("inw") {
                return Some(FileSlot::NpciInward);
            }
            return Some(FileSlot::NpciOutward);
        }
        if has("ntsl") || has("national") {
            return Some(FileSlot::Ntsl);
        }
        if has("adjust") {
            return Some(FileSlot::Adjustment);
        }
        None
    }

    pub fn source(&self) -> Source {
        match self {
            FileSlot::CbsInward | FileSlot::CbsOutward => Source::Cbs,
            FileSlot::Switch => Source::Switch,
            FileSlot::NpciInward | FileSlot::NpciOutward => Source::Npci,
            FileSlot::Ntsl | FileSlot::Adjustment => Source::Ntsl,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            FileSlot::CbsInward | FileSlot::NpciInward => Some(Direction::Inward),
            FileSlot::CbsOutward | FileSlot::NpciOutward => Some(Direction::Outward),
            _ => None,
        }
    }
}

impl fmt::Display for FileSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical normalized transaction record
///
/// `seq` is the stable ingestion index; every tie-break in the matching
/// engine ultimately falls back to it so identical inputs classify
/// identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnRecord {
    pub rrn: String,
    pub upi_tran_id: Option<String>,
    pub amount: Decimal,
    pub tran_date: NaiveDateTime,
    pub dr_cr: Option<DrCr>,
    pub rc: String,
    pub tran_type: String,
    pub source: Source,
    pub direction: Option<Direction>,
    pub cycle: Option<String>,
    pub seq: usize,
}

impl TxnRecord {
    /// Group key: RRN, or the UPI transaction id when RRN is absent
    pub fn group_key(&self) -> Option<String> {
        if !self.rrn.is_empty() {
            Some(self.rrn.clone())
        } else {
            self.upi_tran_id.as_ref().map(|id| format!("UPI_{}", id))
        }
    }
}

/// Reconciliation status of one RRN group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconStatus {
    Matched,
    PartialMatch,
    PartialMismatch,
    Mismatch,
    Orphan,
    Hanging,
    Duplicate,
    ForceMatched,
    Exception,
    ProcessingError,
    Unknown,
}

impl ReconStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconStatus::Matched => "MATCHED",
            ReconStatus::PartialMatch => "PARTIAL_MATCH",
            ReconStatus::PartialMismatch => "PARTIAL_MISMATCH",
            ReconStatus::Mismatch => "MISMATCH",
            ReconStatus::Orphan => "ORPHAN",
            ReconStatus::Hanging => "HANGING",
            ReconStatus::Duplicate => "DUPLICATE",
            ReconStatus::ForceMatched => "FORCE_MATCHED",
            ReconStatus::Exception => "EXCEPTION",
            ReconStatus::ProcessingError => "PROCESSING_ERROR",
            ReconStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ReconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a row was classified by the matching passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchException {
    SelfMatched,
    SettlementEntry,
    DoubleDebitCredit,
    BestMatch,
    RelaxedMatchI,
    RelaxedMatchIi,
    Tcc102,
    Tcc103,
    NpciFailed,
    NpciDeclined,
    FailedAutoReversal,
    RemitterRefund,
    BeneficiaryRecovery,
    SwitchUpdate,
    CutOffTransaction,
    CutOffTime,
    DeclinedThenReversed,
}

impl MatchException {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchException::SelfMatched => "SELF_MATCHED",
            MatchException::SettlementEntry => "SETTLEMENT_ENTRY",
            MatchException::DoubleDebitCredit => "DOUBLE_DEBIT_CREDIT",
            MatchException::BestMatch => "BEST_MATCH",
            MatchException::RelaxedMatchI => "RELAXED_MATCH_I",
            MatchException::RelaxedMatchIi => "RELAXED_MATCH_II",
            MatchException::Tcc102 => "TCC_102",
            MatchException::Tcc103 => "TCC_103",
            MatchException::NpciFailed => "NPCI_FAILED",
            MatchException::NpciDeclined => "NPCI_DECLINED",
            MatchException::FailedAutoReversal => "FAILED_AUTO_REVERSAL",
            MatchException::RemitterRefund => "REMITTER_REFUND",
            MatchException::BeneficiaryRecovery => "BENEFICIARY_RECOVERY",
            MatchException::SwitchUpdate => "SWITCH_UPDATE",
            MatchException::CutOffTransaction => "CUT_OFF_TRANSACTION",
            MatchException::CutOffTime => "CUT_OFF_TIME",
            MatchException::DeclinedThenReversed => "DECLINED_THEN_REVERSED",
        }
    }
}

impl fmt::Display for MatchException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deemed-accepted subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TccCode {
    #[serde(rename = "TCC_102")]
    Tcc102,
    #[serde(rename = "TCC_103")]
    Tcc103,
}

/// Kind of TTUM instruction a record requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TtumType {
    Reversal,
    BeneficiaryCredit,
}

impl TtumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtumType::Reversal => "REVERSAL",
            TtumType::BeneficiaryCredit => "BENEFICIARY_CREDIT",
        }
    }
}

/// TTUM output categories, one CSV per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TtumCategory {
    Drc,
    Rrc,
    Tcc,
    Ret,
    Recovery,
    Refund,
}

impl TtumCategory {
    pub const ALL: [TtumCategory; 6] = [
        TtumCategory::Drc,
        TtumCategory::Rrc,
        TtumCategory::Tcc,
        TtumCategory::Ret,
        TtumCategory::Recovery,
        TtumCategory::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TtumCategory::Drc => "DRC",
            TtumCategory::Rrc => "RRC",
            TtumCategory::Tcc => "TCC",
            TtumCategory::Ret => "RET",
            TtumCategory::Recovery => "RECOVERY",
            TtumCategory::Refund => "REFUND",
        }
    }

    /// Annexure-IV flag for this category (REFUND maps to CR, RECOVERY to DRC)
    pub fn annexure_flag(&self) -> &'static str {
        match self {
            TtumCategory::Refund => "CR",
            TtumCategory::Recovery => "DRC",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for TtumCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One source's leg of a reconciliation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLeg {
    pub amount: Decimal,
    pub date: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_cr: Option<DrCr>,
    #[serde(default)]
    pub rc: String,
    #[serde(default)]
    pub tran_type: String,
}

impl SourceLeg {
    pub fn from_txn(txn: &TxnRecord) -> Self {
        Self {
            amount: txn.amount,
            date: txn.tran_date,
            dr_cr: txn.dr_cr,
            rc: txn.rc.clone(),
            tran_type: txn.tran_type.clone(),
        }
    }
}

/// Reconciliation outcome for one RRN group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cbs: Option<SourceLeg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<SourceLeg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npci: Option<SourceLeg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntsl: Option<SourceLeg>,
    pub status: ReconStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<MatchException>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcc: Option<TccCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hanging_reason: Option<String>,
    #[serde(default)]
    pub needs_ttum: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttum_type: Option<TtumType>,
    #[serde(default)]
    pub settlement_matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_matched_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_matched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_metadata: Option<serde_json::Value>,
}

impl ReconRecord {
    pub fn empty() -> Self {
        Self {
            cbs: None,
            switch: None,
            npci: None,
            ntsl: None,
            status: ReconStatus::Unknown,
            exception: None,
            tcc: None,
            hanging_reason: None,
            needs_ttum: false,
            ttum_type: None,
            settlement_matched: false,
            cycle_id: None,
            match_config: None,
            error: None,
            force_matched_by: None,
            force_matched_at: None,
            rollback_metadata: None,
        }
    }

    /// Number of distinct reporting sources (NTSL excluded; it is a
    /// settlement summary, not a transaction source)
    pub fn sources_present(&self) -> usize {
        [&self.cbs, &self.switch, &self.npci]
            .iter()
            .filter(|leg| leg.is_some())
            .count()
    }

    /// First populated leg in CBS, Switch, NPCI preference order
    pub fn primary_leg(&self) -> Option<&SourceLeg> {
        self.cbs
            .as_ref()
            .or(self.switch.as_ref())
            .or(self.npci.as_ref())
    }
}

/// Count and amount rollup for one summary bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub count: usize,
    pub amount: Decimal,
}

impl BucketTotals {
    pub fn add(&mut self, amount: Decimal) {
        self.count += 1;
        self.amount += amount;
    }
}

/// Summary of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconSummary {
    pub totals: BucketTotals,
    pub matched: BucketTotals,
    pub unmatched: BucketTotals,
    pub hanging: BucketTotals,
    pub exceptions: BucketTotals,
    pub inflow: Decimal,
    pub outflow: Decimal,
    pub ttum_required: usize,
    pub breakdown: BTreeMap<ReconStatus, usize>,
    /// Records each source reported, keyed by source name
    pub by_source: BTreeMap<String, usize>,
    pub exception_types: BTreeMap<String, usize>,
}

/// Entry in the flattened exception listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub rrn: String,
    pub source: Source,
    pub amount: Decimal,
    pub exception_type: String,
    pub ttum_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttum_type: Option<TtumType>,
}

/// Transaction requiring a TTUM instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtumCandidate {
    pub rrn: String,
    pub source: Source,
    pub direction: Direction,
    pub amount: Decimal,
    pub ttum_type: TtumType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
}

/// Full reconciliation output persisted as `recon_output.json`
///
/// Downstream consumers must also tolerate the legacy rendition: a bare
/// RRN-keyed map of records with no envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconOutput {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReconSummary,
    pub records: BTreeMap<String, ReconRecord>,
    pub exceptions: Vec<ExceptionEntry>,
    pub ttum_candidates: Vec<TtumCandidate>,
    pub hanging: Vec<String>,
    /// Hanging RRNs that already hung through the configured wait cycles
    #[serde(default)]
    pub final_hanging: Vec<String>,
}

/// Cross-cycle hanging state persisted as `hanging_state.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HangingState {
    pub hanging: Vec<String>,
    pub generated_at: String,
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Uploaded,
    Reconciled,
    AccountingDone,
    Failed,
    RolledBack,
}

/// Per-run metadata persisted as `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub cycle_id: String,
    pub run_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub uploaded_files: BTreeMap<String, UploadedFileMeta>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping for one uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFileMeta {
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: u64,
}

/// TTUM download marker persisted as `download_meta.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadMeta {
    pub is_downloaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn txn(rrn: &str, source: Source) -> TxnRecord {
        TxnRecord {
            rrn: rrn.to_string(),
            upi_tran_id: None,
            amount: dec!(100.00),
            tran_date: NaiveDate::from_ymd_opt(2025, 1, 10)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            dr_cr: Some(DrCr::Credit),
            rc: "00".to_string(),
            tran_type: "U2".to_string(),
            source,
            direction: None,
            cycle: None,
            seq: 0,
        }
    }

    #[test]
    fn test_source_inference_from_filename() {
        assert_eq!(Source::from_filename("1_CBS_Inward.xlsx"), Some(Source::Cbs));
        assert_eq!(Source::from_filename("switch_data.csv"), Some(Source::Switch));
        assert_eq!(Source::from_filename("NPCI outward remittance.csv"), Some(Source::Npci));
        assert_eq!(Source::from_filename("national_switch.csv"), Some(Source::Ntsl));
        assert_eq!(Source::from_filename("random.csv"), None);
    }

    #[test]
    fn test_slot_inference() {
        assert_eq!(FileSlot::from_filename("cbs_inward_x.csv"), Some(FileSlot::CbsInward));
        assert_eq!(FileSlot::from_filename("CBS Outward.xlsx"), Some(FileSlot::CbsOutward));
        assert_eq!(FileSlot::from_filename("npci inward remittance.csv"), Some(FileSlot::NpciInward));
        assert_eq!(FileSlot::from_filename("7_Internal_Adjustments.xlsx"), Some(FileSlot::Adjustment));
    }

    #[test]
    fn test_drcr_parsing_variants() {
        for raw in ["D", "DR", "debit", " Dr "] {
            assert_eq!(DrCr::parse(raw), Some(DrCr::Debit), "{}", raw);
        }
        for raw in ["C", "CR", "Credit"] {
            assert_eq!(DrCr::parse(raw), Some(DrCr::Credit), "{}", raw);
        }
        assert_eq!(DrCr::parse("X"), None);
    }

    #[test]
    fn test_group_key_falls_back_to_upi_id() {
        let mut t = txn("", Source::Cbs);
        assert_eq!(t.group_key(), None);
        t.upi_tran_id = Some("UPI123".to_string());
        assert_eq!(t.group_key(), Some("UPI_UPI123".to_string()));
        t.rrn = "100000000001".to_string();
        assert_eq!(t.group_key(), Some("100000000001".to_string()));
    }

    #[test]
    fn test_recon_record_sources_present() {
        let mut rec = ReconRecord::empty();
        assert_eq!(rec.sources_present(), 0);
        rec.cbs = Some(SourceLeg::from_txn(&txn("1", Source::Cbs)));
        rec.npci = Some(SourceLeg::from_txn(&txn("1", Source::Npci)));
        // NTSL never counts as a reporting source
        rec.ntsl = Some(SourceLeg::from_txn(&txn("1", Source::Ntsl)));
        assert_eq!(rec.sources_present(), 2);
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&ReconStatus::PartialMismatch).unwrap();
        assert_eq!(json, "\"PARTIAL_MISMATCH\"");
        let back: ReconStatus = serde_json::from_str("\"FORCE_MATCHED\"").unwrap();
        assert_eq!(back, ReconStatus::ForceMatched);
    }

    #[test]
    fn test_annexure_flag_mapping() {
        assert_eq!(TtumCategory::Refund.annexure_flag(), "CR");
        assert_eq!(TtumCategory::Recovery.annexure_flag(), "DRC");
        assert_eq!(TtumCategory::Tcc.annexure_flag(), "TCC");
        assert_eq!(TtumCategory::Ret.annexure_flag(), "RET");
    }
}
