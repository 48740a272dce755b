//! Residual classification and record assembly.
//!
//! After the passes have run, every row group collapses into one
//! reconciliation record. Pass outcomes take precedence; whatever remains
//! is classified by the short-form rule over sources present, amount
//! agreement and date agreement. Per-group failures are captured as
//! PROCESSING_ERROR records without aborting the run.

use crate::engine::{MatchingSettings, RunState};
use crate::types::{Flagged, RowOutcome};
use chrono::Utc;
use recon_core::types::{
    Direction, DrCr, ExceptionEntry, MatchException, ReconOutput, ReconRecord, ReconStatus,
    ReconSummary, Source, SourceLeg, TccCode, TtumCandidate, TxnRecord,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;

/// Exceptions that make the whole record an EXCEPTION rather than feeding
/// the short-form rule
const TERMINAL_EXCEPTIONS: [MatchException; 4] = [
    MatchException::Tcc103,
    MatchException::NpciFailed,
    MatchException::NpciDeclined,
    MatchException::FailedAutoReversal,
];


#[derive(Default)]
struct GroupRows<'a> {
    cbs: Vec<&'a Flagged>,
    switch: Vec<&'a Flagged>,
    npci: Vec<&'a Flagged>,
}

impl<'a> GroupRows<'a> {
    fn all_rows(&self) -> Vec<&'a Flagged> {
        let mut rows: Vec<&'a Flagged> = self
            .cbs
            .iter()
            .chain(self.switch.iter())
            .chain(self.npci.iter())
            .copied()
            .collect();
        rows.sort_by_key(|row| row.txn.seq);
        rows
    }
}

pub(crate) fn build_output(
    run_id: &str,
    state: &RunState,
    settings: &MatchingSettings,
    previous_hanging: &[HashSet<String>],
) -> ReconOutput {
    let mut groups: BTreeMap<String, GroupRows> = BTreeMap::new();
    for row in &state.cbs {
        if let Some(key) = row.txn.group_key() {
            groups.entry(key).or_default().cbs.push(row);
        }
    }
    for row in &state.switch {
        if let Some(key) = row.txn.group_key() {
            groups.entry(key).or_default().switch.push(row);
        }
    }
    for row in &state.npci {
        if let Some(key) = row.txn.group_key() {
            groups.entry(key).or_default().npci.push(row);
        }
    }

    let mut ntsl_by_rrn: BTreeMap<&str, &TxnRecord> = BTreeMap::new();
    for txn in &state.ntsl {
        if !txn.rrn.is_empty() {
            ntsl_by_rrn
                .entry(txn.rrn.as_str())
                .and_modify(|existing| {
                    if txn.seq < existing.seq {
                        *existing = txn;
                    }
                })
                .or_insert(txn);
        }
    }

    let mut records: BTreeMap<String, ReconRecord> = BTreeMap::new();
    let mut summary = ReconSummary::default();
    let mut exceptions: Vec<ExceptionEntry> = Vec::new();
    let mut ttum_candidates: Vec<TtumCandidate> = Vec::new();
    let mut hanging: Vec<String> = Vec::new();

    for (key, group) in &groups {
        let assembled = std::panic::catch_unwind(AssertUnwindSafe(|| {
            assemble_group(key, group, ntsl_by_rrn.get(key.as_str()).copied(), state, settings)
        }));

        let record = match assembled {
            Ok(record) => record,
            Err(_) => {
                tracing::error!(rrn = key.as_str(), "classification failed for record");
                let mut record = ReconRecord::empty();
                record.status = ReconStatus::ProcessingError;
                record.error = Some("classification failed".to_string());
                record
            }
        };

        accumulate_summary(&mut summary, &record, group);

        if let Some(entry) = exception_entry(key, &record) {
            exceptions.push(entry);
        }
        if record.needs_ttum {
            ttum_candidates.push(ttum_candidate(key, &record));
        }
        if record.status == ReconStatus::Hanging {
            hanging.push(key.clone());
        }

        records.insert(key.clone(), record);
    }

    // An RRN is final-hanging only after waiting through the configured
    // number of prior cycles
    let final_hanging: Vec<String> = hanging
        .iter()
        .filter(|rrn| {
            let seen = previous_hanging
                .iter()
                .filter(|set| set.contains(rrn.as_str()))
                .count();
            seen >= settings.hanging_wait_cycles
        })
        .cloned()
        .collect();

    ReconOutput {
        run_id: run_id.to_string(),
        generated_at: Utc::now(),
        summary,
        records,
        exceptions,
        ttum_candidates,
        hanging,
        final_hanging,
    }
}

fn assemble_group(
    key: &str,
    group: &GroupRows,
    ntsl: Option<&TxnRecord>,
    state: &RunState,
    settings: &MatchingSettings,
) -> ReconRecord {
    #[cfg(test)]
    fault::trip(key);

    let mut record = ReconRecord::empty();

    let first_leg = |rows: &[&Flagged]| -> Option<SourceLeg> {
        rows.iter()
            .min_by_key(|row| row.txn.seq)
            .map(|row| SourceLeg::from_txn(&row.txn))
    };
    record.cbs = first_leg(&group.cbs);
    record.switch = first_leg(&group.switch);
    record.npci = first_leg(&group.npci);
    record.ntsl = ntsl.map(SourceLeg::from_txn);

    let rows = group.all_rows();
    record.cycle_id = rows.first().and_then(|row| row.txn.cycle.clone());
    record.exception = rows.iter().find_map(|row| row.state.exception);
    record.match_config = rows
        .iter()
        .find_map(|row| row.state.match_config)
        .map(|name| name.to_string());
    record.needs_ttum = rows.iter().any(|row| row.state.ttum_required);
    record.ttum_type = rows.iter().find_map(|row| row.state.ttum_type);

    record.tcc = rows.iter().find_map(|row| match row.state.exception {
        Some(MatchException::Tcc102) => Some(TccCode::Tcc102),
        Some(MatchException::Tcc103) => Some(TccCode::Tcc103),
        _ => None,
    });

    let hanging_row = rows
        .iter()
        .find(|row| row.state.outcome == Some(RowOutcome::Hanging));
    if let Some(row) = hanging_row {
        record.status = ReconStatus::Hanging;
        record.hanging_reason = row.state.hanging_reason.map(|r| r.to_string());
        return record;
    }

    if rows
        .iter()
        .any(|row| row.state.outcome == Some(RowOutcome::Duplicate))
    {
        record.status = ReconStatus::Duplicate;
        return record;
    }

    if state.settlement_matched.contains(key) {
        record.status = ReconStatus::Matched;
        record.settlement_matched = true;
        return record;
    }

    if rows.iter().any(|row| {
        row.state
            .exception
            .map(|exc| TERMINAL_EXCEPTIONS.contains(&exc))
            .unwrap_or(false)
    }) {
        record.status = ReconStatus::Exception;
        return record;
    }

    if !rows.is_empty()
        && rows
            .iter()
            .all(|row| row.state.outcome == Some(RowOutcome::Matched))
    {
        record.status = ReconStatus::Matched;
        return record;
    }

    record.status = short_form_rule(&record, settings.amount_tolerance);
    record
}

/// `n=3 ∧ A ∧ D → MATCHED; n=3 → MISMATCH; n=2 ∧ A ∧ D → PARTIAL_MATCH;
/// n=2 → PARTIAL_MISMATCH; n=1 → ORPHAN`
fn short_form_rule(record: &ReconRecord, tolerance: Decimal) -> ReconStatus {
    let legs: Vec<&SourceLeg> = [&record.cbs, &record.switch, &record.npci]
        .into_iter()
        .flatten()
        .collect();

    let n = legs.len();
    if n == 0 {
        return ReconStatus::Unknown;
    }
    if n == 1 {
        return ReconStatus::Orphan;
    }

    let amounts_agree = {
        let min = legs.iter().map(|leg| leg.amount).min().unwrap_or_default();
        let max = legs.iter().map(|leg| leg.amount).max().unwrap_or_default();
        max - min <= tolerance
    };
    let dates_agree = legs
        .windows(2)
        .all(|pair| pair[0].date.date() == pair[1].date.date());

    match (n, amounts_agree && dates_agree) {
        (3, true) => ReconStatus::Matched,
        (3, false) => ReconStatus::Mismatch,
        (2, true) => ReconStatus::PartialMatch,
        (2, false) => ReconStatus::PartialMismatch,
        _ => ReconStatus::Unknown,
    }
}

fn accumulate_summary(summary: &mut ReconSummary, record: &ReconRecord, group: &GroupRows) {
    let amount = record
        .primary_leg()
        .map(|leg| leg.amount)
        .unwrap_or(Decimal::ZERO);

    summary.totals.add(amount);
    *summary.breakdown.entry(record.status).or_default() += 1;

    match record.status {
        ReconStatus::Matched | ReconStatus::ForceMatched => summary.matched.add(amount),
        ReconStatus::Hanging => summary.hanging.add(amount),
        ReconStatus::PartialMatch
        | ReconStatus::PartialMismatch
        | ReconStatus::Mismatch
        | ReconStatus::Orphan => summary.unmatched.add(amount),
        ReconStatus::Duplicate
        | ReconStatus::Exception
        | ReconStatus::ProcessingError
        | ReconStatus::Unknown => summary.exceptions.add(amount),
    }

    if record.needs_ttum {
        summary.ttum_required += 1;
    }
    for (source, leg) in [
        (Source::Cbs, &record.cbs),
        (Source::Switch, &record.switch),
        (Source::Npci, &record.npci),
        (Source::Ntsl, &record.ntsl),
    ] {
        if leg.is_some() {
            *summary
                .by_source
                .entry(source.as_str().to_string())
                .or_default() += 1;
        }
    }
    if let Some(exception) = record.exception {
        *summary
            .exception_types
            .entry(exception.as_str().to_string())
            .or_default() += 1;
    }

    // Flow totals sum over every classified record
    match flow_direction(record, group) {
        Some(Direction::Inward) => summary.inflow += amount,
        Some(Direction::Outward) => summary.outflow += amount,
        None => {}
    }
}

fn flow_direction(record: &ReconRecord, group: &GroupRows) -> Option<Direction> {
    if let Some(direction) = group
        .all_rows()
        .first()
        .and_then(|row| row.txn.direction)
    {
        return Some(direction);
    }
    match record.primary_leg().and_then(|leg| leg.dr_cr) {
        Some(DrCr::Credit) => Some(Direction::Inward),
        Some(DrCr::Debit) => Some(Direction::Outward),
        None => None,
    }
}

fn exception_entry(key: &str, record: &ReconRecord) -> Option<ExceptionEntry> {
    let is_exceptional = record.exception.is_some()
        || matches!(
            record.status,
            ReconStatus::Mismatch
                | ReconStatus::PartialMismatch
                | ReconStatus::Duplicate
                | ReconStatus::Exception
                | ReconStatus::ProcessingError
        );
    if !is_exceptional {
        return None;
    }

    let exception_type = record
        .exception
        .map(|exc| exc.as_str().to_string())
        .unwrap_or_else(|| record.status.as_str().to_string());

    Some(ExceptionEntry {
        rrn: key.to_string(),
        source: primary_source(record),
        amount: record
            .primary_leg()
            .map(|leg| leg.amount)
            .unwrap_or(Decimal::ZERO),
        exception_type,
        ttum_required: record.needs_ttum,
        ttum_type: record.ttum_type,
    })
}

fn ttum_candidate(key: &str, record: &ReconRecord) -> TtumCandidate {
    let direction = match record.primary_leg().and_then(|leg| leg.dr_cr) {
        Some(DrCr::Credit) => Direction::Inward,
        _ => Direction::Outward,
    };
    TtumCandidate {
        rrn: key.to_string(),
        source: primary_source(record),
        direction,
        amount: record
            .primary_leg()
            .map(|leg| leg.amount)
            .unwrap_or(Decimal::ZERO),
        ttum_type: record.ttum_type.unwrap_or(recon_core::types::TtumType::Reversal),
        exception_type: record.exception.map(|exc| exc.as_str().to_string()),
    }
}

fn primary_source(record: &ReconRecord) -> Source {
    if record.cbs.is_some() {
        Source::Cbs
    } else if record.switch.is_some() {
        Source::Switch
    } else {
        Source::Npci
    }
}
