//! End-to-end matching scenarios over the full pass pipeline.

use chrono::NaiveDate;
use matching::{MapPriorCycles, MatchInputs, MatchingSettings, NoPriorCycles, UpiMatchingEngine};
use recon_core::types::{DrCr, MatchException, ReconStatus, Source, TccCode, TtumType, TxnRecord};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;

fn txn(
    rrn: &str,
    source: Source,
    amount: Decimal,
    date: (u32, u32),
    dr_cr: Option<DrCr>,
    rc: &str,
    seq: usize,
) -> TxnRecord {
    TxnRecord {
        rrn: rrn.to_string(),
        upi_tran_id: None,
        amount,
        tran_date: NaiveDate::from_ymd_opt(2025, date.0, date.1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap(),
        dr_cr,
        rc: rc.to_string(),
        tran_type: "U2".to_string(),
        source,
        direction: None,
        cycle: Some("1C".to_string()),
        seq,
    }
}

fn engine() -> UpiMatchingEngine {
    UpiMatchingEngine::new(MatchingSettings::default())
}

/// Clean three-way match: identical CBS, Switch and NPCI rows
#[test]
fn scenario_clean_three_way_match() {
    let inputs = MatchInputs {
        cbs: vec![txn("100000000001", Source::Cbs, dec!(1000.00), (1, 10), Some(DrCr::Credit), "00", 0)],
        switch: vec![txn("100000000001", Source::Switch, dec!(1000.00), (1, 10), Some(DrCr::Credit), "00", 1)],
        npci: vec![txn("100000000001", Source::Npci, dec!(1000.00), (1, 10), None, "00", 2)],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_S1", inputs, &NoPriorCycles).unwrap();
    let rec = &output.records["100000000001"];
    assert_eq!(rec.status, ReconStatus::Matched);
    assert!(!rec.needs_ttum);
    assert!(output.ttum_candidates.is_empty());
    assert_eq!(output.summary.matched.count, 1);
    assert_eq!(output.summary.matched.amount, dec!(1000.00));
}

/// Amount mismatch across all three sources
#[test]
fn scenario_amount_mismatch_across_three() {
    let inputs = MatchInputs {
        cbs: vec![txn("100000000001", Source::Cbs, dec!(1000.00), (1, 10), Some(DrCr::Credit), "00", 0)],
        switch: vec![txn("100000000001", Source::Switch, dec!(999.50), (1, 10), Some(DrCr::Credit), "00", 1)],
        npci: vec![txn("100000000001", Source::Npci, dec!(1000.50), (1, 10), None, "00", 2)],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_S2", inputs, &NoPriorCycles).unwrap();
    let rec = &output.records["100000000001"];
    assert_eq!(rec.status, ReconStatus::Mismatch);
    assert!(output
        .exceptions
        .iter()
        .any(|entry| entry.rrn == "100000000001"));
}

/// Orphan: a single CBS debit with no counterpart anywhere
#[test]
fn scenario_orphan_cbs_only() {
    let inputs = MatchInputs {
        cbs: vec![txn("100000000002", Source::Cbs, dec!(500.00), (1, 10), Some(DrCr::Debit), "00", 0)],
        switch: vec![],
        npci: vec![],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_S3", inputs, &NoPriorCycles).unwrap();
    let rec = &output.records["100000000002"];
    assert_eq!(rec.status, ReconStatus::Orphan);
    // S/F/F in the matrix: remitter refund with a TTUM
    assert_eq!(rec.exception, Some(MatchException::RemitterRefund));
    assert!(rec.needs_ttum);
    assert_eq!(output.summary.unmatched.count, 1);
}

/// NPCI declined with CBS and Switch rows present
#[test]
fn scenario_npci_declined() {
    let inputs = MatchInputs {
        cbs: vec![txn("100000000003", Source::Cbs, dec!(200.00), (1, 10), Some(DrCr::Debit), "00", 0)],
        switch: vec![txn("100000000003", Source::Switch, dec!(200.00), (1, 10), Some(DrCr::Debit), "00", 1)],
        npci: vec![txn("100000000003", Source::Npci, dec!(200.00), (1, 10), None, "05", 2)],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_S4", inputs, &NoPriorCycles).unwrap();
    let rec = &output.records["100000000003"];
    assert_eq!(rec.status, ReconStatus::Exception);
    assert_eq!(rec.exception, Some(MatchException::NpciFailed));
    assert!(rec.needs_ttum);
    assert_eq!(rec.ttum_type, Some(TtumType::Reversal));

    let candidate = output
        .ttum_candidates
        .iter()
        .find(|c| c.rrn == "100000000003")
        .unwrap();
    assert_eq!(candidate.ttum_type, TtumType::Reversal);
}

/// Deemed-accepted without a CBS debit: TCC 103 beneficiary credit
#[test]
fn scenario_deemed_accepted_tcc_103() {
    let inputs = MatchInputs {
        cbs: vec![],
        switch: vec![],
        npci: vec![txn("100000000004", Source::Npci, dec!(80.00), (1, 10), None, "RB", 0)],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_S5", inputs, &NoPriorCycles).unwrap();
    let rec = &output.records["100000000004"];
    assert_eq!(rec.status, ReconStatus::Exception);
    assert_eq!(rec.tcc, Some(TccCode::Tcc103));
    assert!(rec.needs_ttum);
    assert_eq!(rec.ttum_type, Some(TtumType::BeneficiaryCredit));
}

/// Every distinct RRN is classified exactly once
#[test]
fn invariant_completeness() {
    let inputs = MatchInputs {
        cbs: vec![
            txn("100000000001", Source::Cbs, dec!(10.00), (1, 10), Some(DrCr::Credit), "00", 0),
            txn("100000000002", Source::Cbs, dec!(20.00), (1, 10), Some(DrCr::Debit), "00", 1),
            txn("100000000003", Source::Cbs, dec!(30.00), (1, 10), Some(DrCr::Debit), "00", 2),
            txn("100000000003", Source::Cbs, dec!(30.00), (1, 10), Some(DrCr::Debit), "00", 3),
        ],
        switch: vec![
            txn("100000000001", Source::Switch, dec!(10.00), (1, 10), Some(DrCr::Credit), "00", 4),
            txn("100000000004", Source::Switch, dec!(40.00), (1, 10), Some(DrCr::Credit), "05", 5),
        ],
        npci: vec![
            txn("100000000001", Source::Npci, dec!(10.00), (1, 10), None, "00", 6),
            txn("100000000005", Source::Npci, dec!(50.00), (1, 11), None, "RB", 7),
            txn("100000000006", Source::Npci, dec!(60.00), (1, 11), None, "91", 8),
        ],
        ntsl: vec![],
    };

    let distinct_rrns: HashSet<&str> = [
        "100000000001",
        "100000000002",
        "100000000003",
        "100000000004",
        "100000000005",
        "100000000006",
    ]
    .into_iter()
    .collect();

    let output = engine().reconcile("RUN_INV", inputs, &NoPriorCycles).unwrap();

    assert_eq!(output.records.len(), distinct_rrns.len());
    for rrn in distinct_rrns {
        assert!(output.records.contains_key(rrn), "missing {}", rrn);
    }

    let classified: usize = output.summary.breakdown.values().sum();
    assert_eq!(classified, output.records.len());
}

/// Identical inputs yield identical serialized records and summary
#[test]
fn invariant_determinism() {
    let build = || MatchInputs {
        cbs: vec![
            txn("100000000001", Source::Cbs, dec!(10.00), (1, 10), Some(DrCr::Credit), "00", 0),
            txn("100000000002", Source::Cbs, dec!(20.00), (1, 10), Some(DrCr::Debit), "00", 1),
        ],
        switch: vec![
            txn("100000000001", Source::Switch, dec!(10.00), (1, 10), Some(DrCr::Credit), "00", 2),
        ],
        npci: vec![
            txn("100000000001", Source::Npci, dec!(10.00), (1, 10), None, "00", 3),
            txn("100000000002", Source::Npci, dec!(20.00), (1, 10), None, "05", 4),
        ],
        ntsl: vec![],
    };

    let engine = engine();
    let first = engine.reconcile("RUN_DET", build(), &NoPriorCycles).unwrap();
    let second = engine.reconcile("RUN_DET", build(), &NoPriorCycles).unwrap();

    assert_eq!(
        serde_json::to_string(&first.records).unwrap(),
        serde_json::to_string(&second.records).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.summary).unwrap(),
        serde_json::to_string(&second.summary).unwrap()
    );
}

/// An RRN hanging through two prior cycles becomes final hanging
#[test]
fn final_hanging_after_wait_cycles() {
    let mut late = txn("100000000009", Source::Npci, dec!(15.00), (1, 10), None, "00", 0);
    late.tran_date = NaiveDate::from_ymd_opt(2025, 1, 10)
        .unwrap()
        .and_hms_opt(23, 5, 0)
        .unwrap();

    let one_prior: HashSet<String> = ["100000000009".to_string()].into_iter().collect();
    let prior = MapPriorCycles {
        reversals: HashSet::new(),
        hanging_sets: vec![one_prior.clone(), one_prior],
    };

    let inputs = MatchInputs {
        cbs: vec![],
        switch: vec![],
        npci: vec![late],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_HANG", inputs, &prior).unwrap();
    assert_eq!(output.hanging, vec!["100000000009".to_string()]);
    assert_eq!(output.final_hanging, vec!["100000000009".to_string()]);
}

/// The same RRN hanging in only one prior cycle is not yet final
#[test]
fn hanging_not_final_before_wait_cycles() {
    let mut late = txn("100000000009", Source::Npci, dec!(15.00), (1, 10), None, "00", 0);
    late.tran_date = NaiveDate::from_ymd_opt(2025, 1, 10)
        .unwrap()
        .and_hms_opt(23, 5, 0)
        .unwrap();

    let one_prior: HashSet<String> = ["100000000009".to_string()].into_iter().collect();
    let prior = MapPriorCycles {
        reversals: HashSet::new(),
        hanging_sets: vec![one_prior],
    };

    let inputs = MatchInputs {
        cbs: vec![],
        switch: vec![],
        npci: vec![late],
        ntsl: vec![],
    };

    let output = engine().reconcile("RUN_HANG2", inputs, &prior).unwrap();
    assert_eq!(output.hanging.len(), 1);
    assert!(output.final_hanging.is_empty());
}

/// Legacy path: no response-code semantics, short-form rule only
#[test]
fn legacy_path_classifies_by_presence_and_agreement() {
    let inputs = MatchInputs {
        cbs: vec![
            txn("200000000001", Source::Cbs, dec!(10.00), (1, 10), Some(DrCr::Credit), "", 0),
            txn("200000000002", Source::Cbs, dec!(20.00), (1, 10), Some(DrCr::Debit), "", 1),
        ],
        switch: vec![
            txn("200000000001", Source::Switch, dec!(10.00), (1, 10), Some(DrCr::Credit), "", 2),
        ],
        npci: vec![txn("200000000001", Source::Npci, dec!(10.00), (1, 10), None, "", 3)],
        ntsl: vec![],
    };

    let output = engine()
        .reconcile_legacy("RUN_LEGACY", inputs, &NoPriorCycles)
        .unwrap();

    assert_eq!(output.records["200000000001"].status, ReconStatus::Matched);
    assert_eq!(output.records["200000000002"].status, ReconStatus::Orphan);
}
