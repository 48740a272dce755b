//! The eight-pass UPI matching state machine.
//!
//! Pass order is fixed:
//!   1. cut-off / hanging detection
//!   2. self-matched (auto-reversal) pairs
//!   3. settlement entries
//!   4. duplicate detection
//!   5. normal three-way matching (best match, then two relaxations)
//!   6. deemed-accepted (TCC 102/103)
//!   7. NPCI-declined
//!   8. failed auto-credit reversal
//! followed by the exception matrix over whatever is still unprocessed.

use crate::classify;
use crate::configs::{MatchKey, MATCH_ROUNDS};
use crate::error::{Error, Result};
use crate::matrix::{self, MatrixAction};
use crate::prior_cycle::PriorCycleLookup;
use crate::types::{hanging_reason, Flagged, PassOutcome};
use chrono::NaiveTime;
use recon_core::config::ReconConfig;
use recon_core::types::{DrCr, MatchException, ReconOutput, TxnRecord};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Tunable thresholds for the matching passes
#[derive(Debug, Clone)]
pub struct MatchingSettings {
    pub amount_tolerance: Decimal,
    pub date_tolerance_days: i64,
    pub partial_match_date_tolerance_days: i64,
    pub cut_off_time: NaiveTime,
    pub cut_off_window_minutes: i64,
    pub settlement_threshold: Decimal,
    pub hanging_wait_cycles: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self::from(&ReconConfig::default())
    }
}

impl From<&ReconConfig> for MatchingSettings {
    fn from(config: &ReconConfig) -> Self {
        Self {
            amount_tolerance: config.amount_tolerance,
            date_tolerance_days: config.date_tolerance_days,
            partial_match_date_tolerance_days: config.partial_match_date_tolerance_days,
            cut_off_time: config.cut_off_time,
            cut_off_window_minutes: config.cut_off_window_minutes,
            settlement_threshold: config.settlement_threshold,
            hanging_wait_cycles: config.hanging_wait_cycles,
        }
    }
}

/// One cycle's datasets
#[derive(Debug, Default)]
pub struct MatchInputs {
    pub cbs: Vec<TxnRecord>,
    pub switch: Vec<TxnRecord>,
    pub npci: Vec<TxnRecord>,
    pub ntsl: Vec<TxnRecord>,
}

/// Working state shared by the passes
pub(crate) struct RunState {
    pub cbs: Vec<Flagged>,
    pub switch: Vec<Flagged>,
    pub npci: Vec<Flagged>,
    pub ntsl: Vec<TxnRecord>,
    /// RRNs flipped to MATCHED by an NTSL settlement amount
    pub settlement_matched: BTreeSet<String>,
}

impl RunState {
    fn new(inputs: MatchInputs) -> Self {
        Self {
            cbs: inputs.cbs.into_iter().map(Flagged::new).collect(),
            switch: inputs.switch.into_iter().map(Flagged::new).collect(),
            npci: inputs.npci.into_iter().map(Flagged::new).collect(),
            ntsl: inputs.ntsl,
            settlement_matched: BTreeSet::new(),
        }
    }
}

/// Deterministic candidate ordering: date, RRN, amount, ingestion index
fn order_key(txn: &TxnRecord) -> (chrono::NaiveDateTime, String, Decimal, usize) {
    (txn.tran_date, txn.rrn.clone(), txn.amount, txn.seq)
}

fn amounts_close(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

fn dates_within(a: chrono::NaiveDateTime, b: chrono::NaiveDateTime, days: i64) -> bool {
    (a.date() - b.date()).num_days().abs() <= days
}

/// The UPI matching engine
pub struct UpiMatchingEngine {
    settings: MatchingSettings,
}

impl UpiMatchingEngine {
    pub fn new(settings: MatchingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MatchingSettings {
        &self.settings
    }

    /// Run the full state machine for one cycle
    pub fn reconcile(
        &self,
        run_id: &str,
        inputs: MatchInputs,
        prior: &dyn PriorCycleLookup,
    ) -> Result<ReconOutput> {
        let total = inputs.cbs.len() + inputs.switch.len() + inputs.npci.len();
        if total == 0 {
            return Err(Error::EmptyInput(
                "CBS, Switch and NPCI datasets are all empty".to_string(),
            ));
        }

        tracing::info!(
            run_id,
            cbs = inputs.cbs.len(),
            switch = inputs.switch.len(),
            npci = inputs.npci.len(),
            ntsl = inputs.ntsl.len(),
            "starting UPI reconciliation"
        );

        let mut state = RunState::new(inputs);
        let next_cycle_reversals = prior.next_cycle_reversals(run_id);

        let passes: [(&str, PassOutcome); 9] = [
            ("cut_off_hanging", self.pass_1_cut_off(&mut state, &next_cycle_reversals)),
            ("self_matched", self.pass_2_self_matched(&mut state)),
            ("settlement_entries", self.pass_3_settlement_entries(&mut state)),
            ("duplicates", self.pass_4_duplicates(&mut state)),
            ("normal_matching", self.pass_5_normal_matching(&mut state)),
            ("deemed_accepted", self.pass_6_deemed_accepted(&mut state)),
            ("npci_declined", self.pass_7_npci_declined(&mut state)),
            ("failed_auto_reversal", self.pass_8_failed_auto_reversal(&mut state)),
            ("exception_matrix", self.apply_exception_matrix(&mut state)),
        ];

        for (name, outcome) in &passes {
            tracing::info!(pass = name, newly_classified = outcome.newly_classified, "pass complete");
        }

        let previous_hanging = prior.previous_hanging_sets(run_id, self.settings.hanging_wait_cycles);
        let output = classify::build_output(run_id, &state, &self.settings, &previous_hanging);

        tracing::info!(
            run_id,
            records = output.records.len(),
            matched = output.summary.matched.count,
            unmatched = output.summary.unmatched.count,
            hanging = output.hanging.len(),
            "UPI reconciliation complete"
        );

        Ok(output)
    }

    /// Legacy (non-UPI) path: no response-code semantics, just self
    /// reversals, settlement entries, duplicate detection and the
    /// short-form classification rule
    pub fn reconcile_legacy(
        &self,
        run_id: &str,
        inputs: MatchInputs,
        prior: &dyn PriorCycleLookup,
    ) -> Result<ReconOutput> {
        let total = inputs.cbs.len() + inputs.switch.len() + inputs.npci.len();
        if total == 0 {
            return Err(Error::EmptyInput(
                "CBS, Switch and NPCI datasets are all empty".to_string(),
            ));
        }

        tracing::info!(run_id, "starting legacy reconciliation");

        let mut state = RunState::new(inputs);
        self.pass_2_self_matched(&mut state);
        self.pass_3_settlement_entries(&mut state);
        self.pass_4_duplicates(&mut state);

        let previous_hanging = prior.previous_hanging_sets(run_id, self.settings.hanging_wait_cycles);
        Ok(classify::build_output(
            run_id,
            &state,
            &self.settings,
            &previous_hanging,
        ))
    }

    // ------------------------------------------------------------------
    // Pass 1 — cut-off / hanging detection
    // ------------------------------------------------------------------

    fn pass_1_cut_off(&self, state: &mut RunState, reversals: &HashSet<String>) -> PassOutcome {
        let mut newly = 0usize;

        for i in 0..state.npci.len() {
            if state.npci[i].state.processed {
                continue;
            }
            let txn = state.npci[i].txn.clone();
            if !txn.rrn.is_empty() {
                let partial = Self::partial_match_amount(
                    &state.cbs,
                    &txn,
                    self.settings.partial_match_date_tolerance_days,
                )
                .or_else(|| {
                    Self::partial_match_amount(
                        &state.switch,
                        &txn,
                        self.settings.partial_match_date_tolerance_days,
                    )
                });

                if let Some(amount) = partial {
                    if !amounts_close(amount, txn.amount, self.settings.amount_tolerance) {
                        state.npci[i].mark_hanging(hanging_reason::CUT_OFF_TRANSACTION);
                        newly += 1;
                        continue;
                    }
                }
            }

            if self.in_cut_off_band(txn.tran_date.time()) {
                state.npci[i].mark_hanging(hanging_reason::CUT_OFF_TIME);
                newly += 1;
            }
        }

        // Cross-cycle refinement: the reversal leg landed in the next run
        if !reversals.is_empty() {
            for rows in [&mut state.cbs, &mut state.switch, &mut state.npci] {
                for row in rows.iter_mut() {
                    if row.is_unprocessed()
                        && !row.txn.rrn.is_empty()
                        && reversals.contains(&row.txn.rrn)
                    {
                        row.mark_hanging(hanging_reason::DECLINED_THEN_REVERSED);
                        newly += 1;
                    }
                }
            }
        }

        PassOutcome { newly_classified: newly }
    }

    /// A transaction sits in cut-off territory from the configured cut-off
    /// time onward, or within the configured window before midnight
    fn in_cut_off_band(&self, time: NaiveTime) -> bool {
        use chrono::Timelike;
        if time >= self.settings.cut_off_time {
            return true;
        }
        let window_secs = self.settings.cut_off_window_minutes.max(0) as u32 * 60;
        let day_secs = 24 * 60 * 60;
        window_secs < day_secs && time.num_seconds_from_midnight() >= day_secs - window_secs
    }

    /// First unprocessed row sharing the RRN with a date inside the partial
    /// tolerance, by deterministic order
    fn partial_match_amount(rows: &[Flagged], target: &TxnRecord, days: i64) -> Option<Decimal> {
        let mut candidates: Vec<&Flagged> = rows
            .iter()
            .filter(|row| {
                row.is_unprocessed()
                    && row.txn.rrn == target.rrn
                    && dates_within(row.txn.tran_date, target.tran_date, days)
            })
            .collect();
        candidates.sort_by_key(|row| order_key(&row.txn));
        candidates.first().map(|row| row.txn.amount)
    }

    // ------------------------------------------------------------------
    // Pass 2 — self-matched (auto-reversal) pairs
    // ------------------------------------------------------------------

    fn pass_2_self_matched(&self, state: &mut RunState) -> PassOutcome {
        let mut newly = 0usize;
        newly += Self::self_match_source(&mut state.cbs, true);
        newly += Self::self_match_source(&mut state.switch, true);
        // NPCI files carry no Dr/Cr; an exact pair is treated as a reversal
        newly += Self::self_match_source(&mut state.npci, false);
        PassOutcome { newly_classified: newly }
    }

    fn self_match_source(rows: &mut [Flagged], require_dr_cr_pair: bool) -> usize {
        type Key = (Option<String>, String, chrono::NaiveDateTime, Decimal);
        let mut groups: BTreeMap<Key, Vec<usize>> = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            // No-RRN rows belong to the settlement-entry pass
            if row.is_unprocessed() && !row.txn.rrn.is_empty() {
                let key = (
                    row.txn.upi_tran_id.clone(),
                    row.txn.rrn.clone(),
                    row.txn.tran_date,
                    row.txn.amount,
                );
                groups.entry(key).or_default().push(i);
            }
        }

        let mut newly = 0usize;
        for idxs in groups.values().filter(|idxs| idxs.len() == 2) {
            if require_dr_cr_pair {
                let pair = (rows[idxs[0]].txn.dr_cr, rows[idxs[1]].txn.dr_cr);
                if !matches!(
                    pair,
                    (Some(DrCr::Debit), Some(DrCr::Credit)) | (Some(DrCr::Credit), Some(DrCr::Debit))
                ) {
                    continue;
                }
            }
            for &i in idxs {
                rows[i].mark_matched(Some(MatchException::SelfMatched), None);
                newly += 1;
            }
        }
        newly
    }

    // ------------------------------------------------------------------
    // Pass 3 — settlement entries
    // ------------------------------------------------------------------

    fn pass_3_settlement_entries(&self, state: &mut RunState) -> PassOutcome {
        let mut newly = 0usize;

        // No-RRN CBS rows above the threshold pair with an opposite-sign
        // row of identical amount
        for i in 0..state.cbs.len() {
            if state.cbs[i].state.processed {
                continue;
            }
            let txn = state.cbs[i].txn.clone();
            if !txn.rrn.is_empty() || txn.amount < self.settings.settlement_threshold {
                continue;
            }
            let dr_cr = match txn.dr_cr {
                Some(dr_cr) => dr_cr,
                None => continue,
            };

            let mut candidates: Vec<usize> = (0..state.cbs.len())
                .filter(|&j| {
                    j != i
                        && state.cbs[j].is_unprocessed()
                        && state.cbs[j].txn.amount == txn.amount
                        && state.cbs[j].txn.dr_cr == Some(dr_cr.opposite())
                })
                .collect();
            candidates.sort_by_key(|&j| order_key(&state.cbs[j].txn));

            if let Some(&j) = candidates.first() {
                state.cbs[i].mark_matched(Some(MatchException::SettlementEntry), None);
                state.cbs[j].mark_matched(Some(MatchException::SettlementEntry), None);
                newly += 2;
            }
        }

        // NTSL amounts matching a reported leg flip the RRN to settled
        for ntsl in &state.ntsl {
            if ntsl.rrn.is_empty() {
                continue;
            }
            let tolerance = self.settings.amount_tolerance;
            let has_leg = state
                .cbs
                .iter()
                .chain(state.switch.iter())
                .chain(state.npci.iter())
                .any(|row| {
                    row.txn.rrn == ntsl.rrn && amounts_close(row.txn.amount, ntsl.amount, tolerance)
                });
            if has_leg {
                state.settlement_matched.insert(ntsl.rrn.clone());
            }
        }

        PassOutcome { newly_classified: newly }
    }

    // ------------------------------------------------------------------
    // Pass 4 — duplicate detection
    // ------------------------------------------------------------------

    fn pass_4_duplicates(&self, state: &mut RunState) -> PassOutcome {
        let mut duplicate_rrns: BTreeSet<String> = BTreeSet::new();

        for rows in [&state.cbs, &state.switch, &state.npci] {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for row in rows.iter().filter(|row| row.is_unprocessed()) {
                if !row.txn.rrn.is_empty() {
                    *counts.entry(row.txn.rrn.as_str()).or_default() += 1;
                }
            }
            duplicate_rrns.extend(
                counts
                    .into_iter()
                    .filter(|(_, count)| *count > 1)
                    .map(|(rrn, _)| rrn.to_string()),
            );
        }

        let mut newly = 0usize;
        for rows in [&mut state.cbs, &mut state.switch, &mut state.npci] {
            for row in rows.iter_mut() {
                if row.is_unprocessed() && duplicate_rrns.contains(&row.txn.rrn) {
                    row.mark_duplicate();
                    newly += 1;
                }
            }
        }

        PassOutcome { newly_classified: newly }
    }

    // ------------------------------------------------------------------
    // Pass 5 — normal three-way matching
    // ------------------------------------------------------------------

    fn pass_5_normal_matching(&self, state: &mut RunState) -> PassOutcome {
        let npci_has_upi = state.npci.iter().any(|row| row.txn.upi_tran_id.is_some());
        let npci_has_rrn = state.npci.iter().any(|row| !row.txn.rrn.is_empty());

        let mut newly = 0usize;
        for round in &MATCH_ROUNDS {
            let usable = round.required.iter().all(|key| match key {
                MatchKey::UpiTranId => npci_has_upi,
                MatchKey::Rrn => npci_has_rrn,
                _ => true,
            });
            if !usable {
                tracing::warn!(round = round.name, "skipping round, required fields absent");
                continue;
            }

            let mut candidates: Vec<usize> = (0..state.npci.len())
                .filter(|&i| state.npci[i].is_unprocessed() && state.npci[i].txn.rc == "00")
                .collect();
            candidates.sort_by_key(|&i| order_key(&state.npci[i].txn));

            let mut round_matched = 0usize;
            for i in candidates {
                if state.npci[i].state.processed {
                    continue;
                }
                let txn = state.npci[i].txn.clone();

                let cbs_idx = self.find_candidate(&state.cbs, &txn, round.keys);
                let switch_idx = self.find_candidate(&state.switch, &txn, round.keys);

                if let (Some(c), Some(s)) = (cbs_idx, switch_idx) {
                    state.cbs[c].mark_matched(Some(round.exception), Some(round.name));
                    state.switch[s].mark_matched(Some(round.exception), Some(round.name));
                    state.npci[i].mark_matched(Some(round.exception), Some(round.name));
                    round_matched += 3;
                }
            }

            newly += round_matched;
            if round_matched > 0 {
                // Stop at the first configuration that matched anything
                break;
            }
        }

        PassOutcome { newly_classified: newly }
    }

    fn find_candidate(
        &self,
        rows: &[Flagged],
        target: &TxnRecord,
        keys: &[MatchKey],
    ) -> Option<usize> {
        let mut matches: Vec<usize> = (0..rows.len())
            .filter(|&i| {
                let row = &rows[i];
                row.is_unprocessed()
                    && keys.iter().all(|key| match key {
                        MatchKey::UpiTranId => match (&row.txn.upi_tran_id, &target.upi_tran_id) {
                            (Some(a), Some(b)) => a == b,
                            _ => false,
                        },
                        MatchKey::Rrn => {
                            !target.rrn.is_empty() && row.txn.rrn == target.rrn
                        }
                        MatchKey::TranDate => {
                            row.txn.tran_date == target.tran_date
                                || dates_within(
                                    row.txn.tran_date,
                                    target.tran_date,
                                    self.settings.date_tolerance_days,
                                )
                        }
                        MatchKey::Amount => amounts_close(
                            row.txn.amount,
                            target.amount,
                            self.settings.amount_tolerance,
                        ),
                    })
            })
            .collect();

        matches.sort_by_key(|&i| order_key(&rows[i].txn));
        matches.into_iter().next()
    }

    // ------------------------------------------------------------------
    // Pass 6 — deemed-accepted (TCC)
    // ------------------------------------------------------------------

    fn pass_6_deemed_accepted(&self, state: &mut RunState) -> PassOutcome {
        let mut newly = 0usize;

        let mut candidates: Vec<usize> = (0..state.npci.len())
            .filter(|&i| state.npci[i].is_unprocessed() && state.npci[i].txn.rc == "RB")
            .collect();
        candidates.sort_by_key(|&i| order_key(&state.npci[i].txn));

        for i in candidates {
            let rrn = state.npci[i].txn.rrn.clone();

            let mut debits: Vec<usize> = (0..state.cbs.len())
                .filter(|&c| {
                    state.cbs[c].is_unprocessed()
                        && !rrn.is_empty()
                        && state.cbs[c].txn.rrn == rrn
                        && state.cbs[c].txn.dr_cr == Some(DrCr::Debit)
                })
                .collect();
            debits.sort_by_key(|&c| order_key(&state.cbs[c].txn));

            match debits.first() {
                Some(&c) => {
                    state.npci[i].mark_matched(Some(MatchException::Tcc102), None);
                    state.cbs[c].mark_matched(Some(MatchException::Tcc102), None);
                    newly += 2;
                }
                None => {
                    state.npci[i].mark_unmatched(
                        MatchException::Tcc103,
                        Some(recon_core::types::TtumType::BeneficiaryCredit),
                    );
                    newly += 1;
                }
            }
        }

        PassOutcome { newly_classified: newly }
    }

    // ------------------------------------------------------------------
    // Pass 7 — NPCI-declined
    // ------------------------------------------------------------------

    fn pass_7_npci_declined(&self, state: &mut RunState) -> PassOutcome {
        let mut newly = 0usize;

        for i in 0..state.npci.len() {
            if state.npci[i].state.processed {
                continue;
            }
            let rc = state.npci[i].txn.rc.as_str();
            if rc == "00" || rc == "RB" {
                continue;
            }
            let rrn = state.npci[i].txn.rrn.clone();

            if !rrn.is_empty() {
                for row in state.cbs.iter_mut() {
                    if row.is_unprocessed() && row.txn.rrn == rrn {
                        row.mark_unmatched(
                            MatchException::NpciFailed,
                            Some(recon_core::types::TtumType::Reversal),
                        );
                        newly += 1;
                    }
                }
            }

            state.npci[i].mark_unmatched(MatchException::NpciDeclined, None);
            newly += 1;
        }

        PassOutcome { newly_classified: newly }
    }

    // ------------------------------------------------------------------
    // Pass 8 — failed auto-credit reversal
    // ------------------------------------------------------------------

    fn pass_8_failed_auto_reversal(&self, state: &mut RunState) -> PassOutcome {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, row) in state.npci.iter().enumerate() {
            if row.is_unprocessed() && !row.txn.rrn.is_empty() {
                groups.entry(row.txn.rrn.clone()).or_default().push(i);
            }
        }

        let mut newly = 0usize;
        for (rrn, idxs) in groups {
            if idxs.len() != 2 {
                continue;
            }
            if state.npci[idxs[0]].txn.amount != state.npci[idxs[1]].txn.amount {
                continue;
            }

            let cbs_idxs: Vec<usize> = (0..state.cbs.len())
                .filter(|&c| state.cbs[c].is_unprocessed() && state.cbs[c].txn.rrn == rrn)
                .collect();
            if cbs_idxs.len() != 1 {
                continue;
            }

            for &i in &idxs {
                state.npci[i].mark_unmatched(
                    MatchException::FailedAutoReversal,
                    Some(recon_core::types::TtumType::Reversal),
                );
                newly += 1;
            }
            state.cbs[cbs_idxs[0]].mark_unmatched(
                MatchException::FailedAutoReversal,
                Some(recon_core::types::TtumType::Reversal),
            );
            newly += 1;
        }

        PassOutcome { newly_classified: newly }
    }

    // ------------------------------------------------------------------
    // Exception matrix — residual classifier
    // ------------------------------------------------------------------

    fn apply_exception_matrix(&self, state: &mut RunState) -> PassOutcome {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        for rows in [&state.cbs, &state.switch, &state.npci] {
            for row in rows.iter().filter(|row| row.is_unprocessed()) {
                if let Some(key) = row.txn.group_key() {
                    keys.insert(key);
                }
            }
        }

        let mut newly = 0usize;
        for key in keys {
            let first_rc = |rows: &[Flagged]| -> Option<String> {
                let mut idxs: Vec<usize> = (0..rows.len())
                    .filter(|&i| {
                        rows[i].is_unprocessed() && rows[i].txn.group_key().as_deref() == Some(&key)
                    })
                    .collect();
                idxs.sort_by_key(|&i| order_key(&rows[i].txn));
                idxs.first().map(|&i| rows[i].txn.rc.clone())
            };

            let cbs_present = state.cbs.iter().any(|row| {
                row.is_unprocessed() && row.txn.group_key().as_deref() == Some(&key)
            });
            let switch_rc = first_rc(&state.switch);
            let npci_rc = first_rc(&state.npci);

            let entry = matrix::resolve(
                matrix::cbs_health(cbs_present),
                matrix::switch_health(switch_rc.as_deref()),
                matrix::npci_health(npci_rc.as_deref()),
            );

            for rows in [&mut state.cbs, &mut state.switch, &mut state.npci] {
                for row in rows.iter_mut() {
                    if !row.is_unprocessed() || row.txn.group_key().as_deref() != Some(&key) {
                        continue;
                    }
                    match entry.action {
                        // The short-form rule decides the final status for
                        // these; the matrix only contributes flags
                        MatrixAction::Matched | MatrixAction::Unmatched => {
                            row.mark_residual_unmatched()
                        }
                        _ => {
                            let (exception, ttum) =
                                entry.exception().expect("actionable matrix entry");
                            row.mark_unmatched(exception, ttum);
                        }
                    }
                    newly += 1;
                }
            }
        }

        PassOutcome { newly_classified: newly }
    }
}
