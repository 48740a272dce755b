//! Cross-cycle lookup capability.
//!
//! The matching engine never touches the filesystem directly for
//! cross-cycle state; it is handed a read-only `PriorCycleLookup`.
//! Production wires this to the run store, tests wire a synthetic map.

use recon_core::store::RunStore;
use recon_core::types::{HangingState, ReconOutput};
use std::collections::HashSet;

/// Read-only view of adjacent runs' persisted state
pub trait PriorCycleLookup {
    /// RRNs whose NPCI leg in the chronologically next run carries a
    /// response code beginning `RB`
    fn next_cycle_reversals(&self, run_id: &str) -> HashSet<String>;

    /// Hanging RRN sets of up to `n` previous runs, most recent first
    fn previous_hanging_sets(&self, run_id: &str, n: usize) -> Vec<HashSet<String>>;
}

/// Lookup for runs with no neighbours
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPriorCycles;

impl PriorCycleLookup for NoPriorCycles {
    fn next_cycle_reversals(&self, _run_id: &str) -> HashSet<String> {
        HashSet::new()
    }

    fn previous_hanging_sets(&self, _run_id: &str, _n: usize) -> Vec<HashSet<String>> {
        Vec::new()
    }
}

/// Synthetic lookup for tests
#[derive(Debug, Clone, Default)]
pub struct MapPriorCycles {
    pub reversals: HashSet<String>,
    pub hanging_sets: Vec<HashSet<String>>,
}

impl PriorCycleLookup for MapPriorCycles {
    fn next_cycle_reversals(&self, _run_id: &str) -> HashSet<String> {
        self.reversals.clone()
    }

    fn previous_hanging_sets(&self, _run_id: &str, n: usize) -> Vec<HashSet<String>> {
        self.hanging_sets.iter().take(n).cloned().collect()
    }
}

/// Store-backed lookup used in production
pub struct StorePriorCycles<'a> {
    store: &'a RunStore,
}

impl<'a> StorePriorCycles<'a> {
    pub fn new(store: &'a RunStore) -> Self {
        Self { store }
    }
}

impl PriorCycleLookup for StorePriorCycles<'_> {
    fn next_cycle_reversals(&self, run_id: &str) -> HashSet<String> {
        let next = match self.store.next_run(run_id) {
            Ok(Some(next)) => next,
            _ => return HashSet::new(),
        };
        let path = self.store.recon_output_path(&next);
        let value: serde_json::Value = match self.store.read_json(&path) {
            Ok(Some(value)) => value,
            _ => return HashSet::new(),
        };
        extract_reversal_rrns(&value)
    }

    fn previous_hanging_sets(&self, run_id: &str, n: usize) -> Vec<HashSet<String>> {
        let previous = match self.store.previous_runs(run_id, n) {
            Ok(previous) => previous,
            Err(_) => return Vec::new(),
        };
        previous
            .iter()
            .map(|run| {
                let path = self.store.hanging_state_path(run);
                match self.store.read_json::<HangingState>(&path) {
                    Ok(Some(state)) => state.hanging.into_iter().collect(),
                    _ => HashSet::new(),
                }
            })
            .collect()
    }
}

/// Pull reversal RRNs out of either recon output rendition: the envelope
/// with a `records` map, a bare RRN-keyed map, or matched/unmatched arrays.
fn extract_reversal_rrns(value: &serde_json::Value) -> HashSet<String> {
    let mut rrns = HashSet::new();

    let npci_is_reversal = |record: &serde_json::Value| -> bool {
        record
            .get("npci")
            .and_then(|npci| npci.get("rc"))
            .and_then(|rc| rc.as_str())
            .map(|rc| rc.to_uppercase().starts_with("RB"))
            .unwrap_or(false)
    };

    let record_map = value
        .get("records")
        .and_then(|r| r.as_object())
        .or_else(|| value.as_object());

    if let Some(map) = record_map {
        for (rrn, record) in map {
            if npci_is_reversal(record) {
                rrns.insert(rrn.clone());
            }
        }
    }

    for key in ["matched", "unmatched"] {
        if let Some(entries) = value.get(key).and_then(|v| v.as_array()) {
            for entry in entries {
                if npci_is_reversal(entry) {
                    if let Some(rrn) = entry
                        .get("rrn")
                        .or_else(|| entry.get("RRN"))
                        .and_then(|r| r.as_str())
                    {
                        rrns.insert(rrn.to_string());
                    }
                }
            }
        }
    }

    rrns
}

/// Convenience for building the lookup from a fully-typed output in tests
pub fn reversals_from_output(output: &ReconOutput) -> HashSet<String> {
    output
        .records
        .iter()
        .filter(|(_, rec)| {
            rec.npci
                .as_ref()
                .map(|leg| leg.rc.to_uppercase().starts_with("RB"))
                .unwrap_or(false)
        })
        .map(|(rrn, _)| rrn.clone())
        .collect()
}
