//! Multi-level rollback manager.
//!
//! Five operations share one discipline: validate preconditions, copy the
//! target artifact to a timestamped backup, apply the mutation, persist via
//! write-temp-rename, and drive the history record through
//! `pending → in_progress → {completed, failed}`. A failed rollback leaves
//! the prior state intact; no partial state is externally observable.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use recon_core::store::RunStore;
use recon_core::types::DownloadMeta;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Rollback operation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackLevel {
    /// File validation failure during upload
    Ingestion,
    /// During reconciliation
    MidRecon,
    /// Specific NPCI cycle
    CycleWise,
    /// Voucher generation failure
    Accounting,
    /// Remove the whole run
    WholeProcess,
}

impl RollbackLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackLevel::Ingestion => "ingestion",
            RollbackLevel::MidRecon => "mid_recon",
            RollbackLevel::CycleWise => "cycle_wise",
            RollbackLevel::Accounting => "accounting",
            RollbackLevel::WholeProcess => "whole_process",
        }
    }
}

/// Status of a rollback operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One entry in `rollback_history.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub rollback_id: String,
    pub level: RollbackLevel,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: RollbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub details: Value,
}

/// Result of a completed rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub rollback_id: String,
    pub status: RollbackStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default)]
    pub transactions_restored: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vouchers_reset: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_file: Option<String>,
}

/// NPCI settlement cycles eligible for cycle-wise rollback
const VALID_CYCLES: [&str; 10] = ["1A", "1B", "1C", "2A", "2B", "2C", "3A", "3B", "3C", "4"];

/// Statuses a mid-recon/cycle-wise rollback moves back to unmatched
const ROLLBACKABLE_STATUSES: [&str; 2] = ["MATCHED", "FORCE_MATCHED"];

/// Rollback manager over the run store
pub struct RollbackManager {
    store: RunStore,
    lock: Mutex<()>,
}

impl RollbackManager {
    pub fn new(store: RunStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn history(&self, run_id: Option<&str>) -> Result<Vec<RollbackRecord>> {
        let path = self.store.rollback_history_path();
        let history: Vec<RollbackRecord> = self.store.read_json(&path)?.unwrap_or_default();
        Ok(match run_id {
            Some(run_id) => history.into_iter().filter(|r| r.run_id == run_id).collect(),
            None => history,
        })
    }

    fn write_history(&self, history: &[RollbackRecord]) -> Result<()> {
        let path = self.store.rollback_history_path();
        self.store.write_json(&path, &history)?;
        Ok(())
    }

    fn log_rollback(
        &self,
        level: RollbackLevel,
        run_id: &str,
        details: Value,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let rollback_id = format!("ROLLBACK_{}_{}", run_id, now.format("%Y%m%d_%H%M%S"));
        let mut history = self.history(None)?;
        history.push(RollbackRecord {
            rollback_id: rollback_id.clone(),
            level,
            run_id: run_id.to_string(),
            timestamp: now,
            status: RollbackStatus::Pending,
            updated_at: None,
            details,
        });
        self.write_history(&history)?;
        Ok(rollback_id)
    }

    fn update_status(&self, rollback_id: &str, status: RollbackStatus, now: DateTime<Utc>) -> Result<()> {
        let mut history = self.history(None)?;
        for record in history.iter_mut() {
            if record.rollback_id == rollback_id {
                record.status = status;
                record.updated_at = Some(now);
                break;
            }
        }
        self.write_history(&history)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn validate_allowed(&self, run_id: &str, level: RollbackLevel) -> Result<()> {
        let history = self.history(Some(run_id))?;
        if history
            .last()
            .map(|r| r.status == RollbackStatus::InProgress)
            .unwrap_or(false)
        {
            return Err(Error::Conflict(
                "Rollback already in progress for this run".to_string(),
            ));
        }

        if !self.store.run_exists(run_id) {
            return Err(Error::NotFound(format!("Run {} not found", run_id)));
        }

        match level {
            RollbackLevel::MidRecon | RollbackLevel::CycleWise => {
                if !self.store.recon_output_path(run_id).exists() {
                    return Err(Error::State(format!(
                        "No reconciliation output found for {} rollback",
                        level.as_str()
                    )));
                }
            }
            RollbackLevel::Accounting => {
                if !self.store.accounting_output_path(run_id).exists() {
                    return Err(Error::State(
                        "No accounting output found for accounting rollback".to_string(),
                    ));
                }
            }
            RollbackLevel::Ingestion | RollbackLevel::WholeProcess => {}
        }

        Ok(())
    }

    /// Run the mutation under the history discipline
    fn run_guarded<F>(
        &self,
        level: RollbackLevel,
        run_id: &str,
        details: Value,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<RollbackOutcome>
    where
        F: FnOnce(&str) -> Result<RollbackOutcome>,
    {
        let _guard = self.lock.lock();
        self.validate_allowed(run_id, level)?;

        let rollback_id = self.log_rollback(level, run_id, details, now)?;
        self.update_status(&rollback_id, RollbackStatus::InProgress, now)?;

        match mutate(&rollback_id) {
            Ok(mut outcome) => {
                self.update_status(&rollback_id, RollbackStatus::Completed, now)?;
                outcome.status = RollbackStatus::Completed;
                tracing::info!(rollback_id = %rollback_id, level = level.as_str(), run_id, "rollback completed");
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.update_status(&rollback_id, RollbackStatus::Failed, now);
                tracing::error!(rollback_id = %rollback_id, level = level.as_str(), run_id, error = %e, "rollback failed");
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // INGESTION
    // ------------------------------------------------------------------

    /// Remove one failed uploaded file, preserving the rest of the upload
    pub fn ingestion_rollback(
        &self,
        run_id: &str,
        failed_filename: &str,
        validation_error: &str,
        now: DateTime<Utc>,
    ) -> Result<RollbackOutcome> {
        let details = json!({
            "failed_file": failed_filename,
            "error": validation_error,
            "action": "remove_failed_file",
        });

        let store = self.store.clone();
        let failed = failed_filename.to_string();
        let error = validation_error.to_string();

        self.run_guarded(RollbackLevel::Ingestion, run_id, details, now, move |rollback_id| {
            let removed = store.remove_upload(run_id, &failed)?;

            // Keep metadata.uploaded_files consistent with the directory
            let metadata_path = store.metadata_path(run_id);
            if let Some(mut metadata) = store.read_json::<Value>(&metadata_path)? {
                if let Some(files) = metadata
                    .get_mut("uploaded_files")
                    .and_then(|f| f.as_object_mut())
                {
                    files.retain(|_, meta| {
                        meta.get("stored_name").and_then(|n| n.as_str()) != Some(failed.as_str())
                    });
                }
                let entry = json!({
                    "rollback_id": rollback_id,
                    "timestamp": now.to_rfc3339(),
                    "removed_file": failed,
                    "reason": error,
                });
                match metadata
                    .get_mut("rollback_history")
                    .and_then(|h| h.as_array_mut())
                {
                    Some(history) => history.push(entry),
                    None => {
                        if let Some(obj) = metadata.as_object_mut() {
                            obj.insert("rollback_history".to_string(), json!([entry]));
                        }
                    }
                }
                store.write_json(&metadata_path, &metadata)?;
            }

            Ok(RollbackOutcome {
                rollback_id: rollback_id.to_string(),
                status: RollbackStatus::InProgress,
                message: format!("Ingestion rollback completed for {}", failed),
                backup_path: None,
                transactions_restored: 0,
                vouchers_reset: Vec::new(),
                removed_file: removed.then(|| failed.clone()),
            })
        })
    }

    // ------------------------------------------------------------------
    // MID-RECON
    // ------------------------------------------------------------------

    /// Move selected matched transactions (or all, if no list given) back
    /// to the unmatched state
    pub fn mid_recon_rollback(
        &self,
        run_id: &str,
        reason: &str,
        affected_rrns: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<RollbackOutcome> {
        let details = json!({
            "error": reason,
            "affected_count": affected_rrns.map(|a| a.len()).unwrap_or(0),
            "action": "restore_unmatched_state",
        });

        let store = self.store.clone();
        let reason = reason.to_string();
        let affected: Option<Vec<String>> = affected_rrns.map(|a| a.to_vec());

        self.run_guarded(RollbackLevel::MidRecon, run_id, details, now, move |rollback_id| {
            let path = store.recon_output_path(run_id);
            let backup = store.backup_file(&path, "recon_output", now)?;

            let mut value: Value = store
                .read_json(&path)?
                .ok_or_else(|| Error::State("Reconciliation output vanished".to_string()))?;

            let restored = restore_to_unmatched(
                &mut value,
                |rrn, record| match &affected {
                    Some(list) => list.iter().any(|target| target == rrn),
                    None => {
                        let status = record.get("status").and_then(|s| s.as_str()).unwrap_or("");
                        ROLLBACKABLE_STATUSES.contains(&status)
                    }
                },
                rollback_id,
                &reason,
                now,
            );

            annotate_last_rollback(&mut value, rollback_id, "mid_recon", restored.len(), now);
            store.write_json(&path, &value)?;

            Ok(RollbackOutcome {
                rollback_id: rollback_id.to_string(),
                status: RollbackStatus::InProgress,
                message: format!(
                    "Mid-recon rollback completed. {} transactions restored to unmatched state.",
                    restored.len()
                ),
                backup_path: Some(backup),
                transactions_restored: restored.len(),
                vouchers_reset: Vec::new(),
                removed_file: None,
            })
        })
    }

    // ------------------------------------------------------------------
    // CYCLE-WISE
    // ------------------------------------------------------------------

    /// Move all matched transactions of one NPCI cycle back to unmatched
    pub fn cycle_wise_rollback(
        &self,
        run_id: &str,
        cycle_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RollbackOutcome> {
        if !VALID_CYCLES.contains(&cycle_id) {
            return Err(Error::Validation(format!(
                "Invalid cycle ID '{}'. Valid cycles: {}",
                cycle_id,
                VALID_CYCLES.join(", ")
            )));
        }

        let details = json!({
            "cycle_id": cycle_id,
            "action": "restore_cycle_data",
        });

        let store = self.store.clone();
        let cycle = cycle_id.to_string();

        self.run_guarded(RollbackLevel::CycleWise, run_id, details, now, move |rollback_id| {
            let path = store.recon_output_path(run_id);
            let backup = store.backup_file(&path, &format!("cycle_{}", cycle), now)?;

            let mut value: Value = store
                .read_json(&path)?
                .ok_or_else(|| Error::State("Reconciliation output vanished".to_string()))?;

            let reason = format!("Cycle {} rollback for re-processing", cycle);
            let restored = restore_to_unmatched(
                &mut value,
                |_, record| {
                    let status = record.get("status").and_then(|s| s.as_str()).unwrap_or("");
                    let record_cycle = record.get("cycle_id").and_then(|c| c.as_str()).unwrap_or("");
                    ROLLBACKABLE_STATUSES.contains(&status) && record_cycle == cycle
                },
                rollback_id,
                &reason,
                now,
            );

            if restored.is_empty() {
                tracing::warn!(run_id, cycle = %cycle, "no matched transactions found for cycle");
            }

            annotate_last_rollback(&mut value, rollback_id, "cycle_wise", restored.len(), now);
            store.write_json(&path, &value)?;

            Ok(RollbackOutcome {
                rollback_id: rollback_id.to_string(),
                status: RollbackStatus::InProgress,
                message: format!(
                    "Cycle {} rolled back for re-processing. {} transactions restored.",
                    cycle,
                    restored.len()
                ),
                backup_path: Some(backup),
                transactions_restored: restored.len(),
                vouchers_reset: Vec::new(),
                removed_file: None,
            })
        })
    }

    // ------------------------------------------------------------------
    // ACCOUNTING
    // ------------------------------------------------------------------

    /// Reset generated vouchers to `matched/pending`, clearing GL entries.
    /// Refused once the TTUM files have been downloaded.
    pub fn accounting_rollback(
        &self,
        run_id: &str,
        reason: &str,
        voucher_ids: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<RollbackOutcome> {
        if reason.trim().is_empty() {
            return Err(Error::Validation("Rollback reason cannot be empty".to_string()));
        }

        // Download lock: settled instructions must not be silently rewound
        let meta: Option<DownloadMeta> = self.store.read_json(&self.store.download_meta_path(run_id))?;
        if meta.map(|m| m.is_downloaded).unwrap_or(false) {
            return Err(Error::State(
                "TTUM files already downloaded for this run; accounting rollback is not permitted"
                    .to_string(),
            ));
        }

        let details = json!({
            "reason": reason,
            "voucher_count": voucher_ids.map(|v| v.len()).unwrap_or(0),
            "action": "reset_to_matched_pending",
        });

        let store = self.store.clone();
        let reason = reason.to_string();
        let targets: Option<Vec<String>> = voucher_ids.map(|v| v.to_vec());

        self.run_guarded(RollbackLevel::Accounting, run_id, details, now, move |rollback_id| {
            let path = store.accounting_output_path(run_id);
            let backup = store.backup_file(&path, "accounting", now)?;

            let mut value: Value = store
                .read_json(&path)?
                .ok_or_else(|| Error::State("Accounting output vanished".to_string()))?;

            let mut vouchers_reset = Vec::new();
            let mut not_found: Vec<String> = targets.clone().unwrap_or_default();

            if let Some(vouchers) = value.get_mut("vouchers").and_then(|v| v.as_array_mut()) {
                for voucher in vouchers {
                    let id = voucher
                        .get("voucher_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let targeted = match &targets {
                        Some(list) => list.iter().any(|t| t == &id),
                        None => true,
                    };
                    let generated = voucher.get("status").and_then(|s| s.as_str())
                        == Some(settlement::types::VOUCHER_GENERATED);
                    if !targeted || !generated {
                        continue;
                    }

                    not_found.retain(|t| t != &id);
                    let previous_entries = voucher.get("gl_entries").cloned().unwrap_or(json!([]));
                    if let Some(obj) = voucher.as_object_mut() {
                        obj.insert(
                            "previous_status".to_string(),
                            settlement::types::VOUCHER_GENERATED.into(),
                        );
                        obj.insert(
                            "status".to_string(),
                            settlement::types::MATCHED_PENDING.into(),
                        );
                        obj.insert(
                            "rollback_metadata".to_string(),
                            json!({
                                "rollback_id": rollback_id,
                                "rollback_timestamp": now.to_rfc3339(),
                                "rollback_reason": reason,
                                "previous_gl_entries": previous_entries,
                            }),
                        );
                        obj.insert("gl_entries".to_string(), json!([]));
                    }
                    vouchers_reset.push(id);
                }
            }

            if !not_found.is_empty() {
                tracing::warn!(vouchers = ?not_found, "vouchers not found for rollback");
            }

            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "accounting_status".to_string(),
                    json!({
                        "status": "rolled_back",
                        "vouchers_reset": vouchers_reset.len(),
                        "vouchers_not_found": not_found.len(),
                        "rollback_reason": reason,
                        "rollback_id": rollback_id,
                        "timestamp": now.to_rfc3339(),
                        "gl_entries_cleared": true,
                    }),
                );
            }

            store.write_json(&path, &value)?;

            Ok(RollbackOutcome {
                rollback_id: rollback_id.to_string(),
                status: RollbackStatus::InProgress,
                message: format!(
                    "Accounting rollback completed. {} vouchers reset to matched/pending state.",
                    vouchers_reset.len()
                ),
                backup_path: Some(backup),
                transactions_restored: 0,
                vouchers_reset,
                removed_file: None,
            })
        })
    }

    // ------------------------------------------------------------------
    // WHOLE PROCESS
    // ------------------------------------------------------------------

    /// Delete every artifact of the run
    pub fn whole_process_rollback(&self, run_id: &str, now: DateTime<Utc>) -> Result<RollbackOutcome> {
        let details = json!({"action": "delete_run_artifacts"});
        let store = self.store.clone();

        self.run_guarded(RollbackLevel::WholeProcess, run_id, details, now, move |rollback_id| {
            store.delete_run(run_id)?;
            Ok(RollbackOutcome {
                rollback_id: rollback_id.to_string(),
                status: RollbackStatus::InProgress,
                message: format!("Run {} removed", run_id),
                backup_path: None,
                transactions_restored: 0,
                vouchers_reset: Vec::new(),
                removed_file: None,
            })
        })
    }
}

/// Move records selected by `select` back to the unmatched state, in either
/// recon output rendition. Returns the restored RRNs.
fn restore_to_unmatched<F>(
    value: &mut Value,
    mut select: F,
    rollback_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Vec<String>
where
    F: FnMut(&str, &Value) -> bool,
{
    let mut restored = Vec::new();

    let metadata = |previous_status: &str| {
        json!({
            "rollback_id": rollback_id,
            "previous_status": previous_status,
            "rollback_timestamp": now.to_rfc3339(),
            "rollback_reason": reason,
        })
    };

    let mut process_map = |map: &mut serde_json::Map<String, Value>| {
        for (rrn, record) in map.iter_mut() {
            if !record.is_object() || !select(rrn, record) {
                continue;
            }
            let status = record
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("")
                .to_string();
            if !ROLLBACKABLE_STATUSES.contains(&status.as_str()) {
                continue;
            }
            if let Some(obj) = record.as_object_mut() {
                obj.insert("status".to_string(), "UNKNOWN".into());
                obj.insert("rollback_metadata".to_string(), metadata(&status));
            }
            restored.push(rrn.clone());
        }
    };

    // Envelope rendition: records map under "records"
    if value.get("records").map(|r| r.is_object()).unwrap_or(false) {
        if let Some(map) = value.get_mut("records").and_then(|r| r.as_object_mut()) {
            process_map(map);
        }
        return restored;
    }

    // Legacy bare RRN-keyed map
    if value.is_object() && value.get("matched").is_none() {
        if let Some(map) = value.as_object_mut() {
            process_map(map);
        }
        return restored;
    }

    // Legacy matched/unmatched array rendition
    let matched: Vec<Value> = value
        .get_mut("matched")
        .and_then(|m| m.as_array_mut())
        .map(std::mem::take)
        .unwrap_or_default();

    let mut remaining = Vec::new();
    let mut moved = Vec::new();
    for txn in matched {
        let rrn = txn
            .get("rrn")
            .or_else(|| txn.get("RRN"))
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();
        if select(&rrn, &txn) {
            let mut txn = txn;
            if let Some(obj) = txn.as_object_mut() {
                obj.insert("rollback_metadata".to_string(), metadata("matched"));
            }
            restored.push(rrn);
            moved.push(txn);
        } else {
            remaining.push(txn);
        }
    }

    if let Some(obj) = value.as_object_mut() {
        obj.insert("matched".to_string(), Value::Array(remaining));
        let unmatched = obj
            .entry("unmatched".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(arr) = unmatched.as_array_mut() {
            arr.extend(moved);
        }
    }

    restored
}

fn annotate_last_rollback(
    value: &mut Value,
    rollback_id: &str,
    level: &str,
    restored: usize,
    now: DateTime<Utc>,
) {
    let info = json!({
        "rollback_id": rollback_id,
        "level": level,
        "transactions_restored": restored,
        "timestamp": now.to_rfc3339(),
    });
    match value.get_mut("summary").and_then(|s| s.as_object_mut()) {
        Some(summary) => {
            summary.insert("last_rollback".to_string(), info);
        }
        None => {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("summary".to_string(), json!({ "last_rollback": info }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement::types::{MATCHED_PENDING, VOUCHER_GENERATED};

    fn setup() -> (tempfile::TempDir, RollbackManager, RunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        std::fs::create_dir_all(store.run_dir("RUN_20250110_100000")).unwrap();
        let manager = RollbackManager::new(store.clone());
        (dir, manager, store)
    }

    fn run() -> &'static str {
        "RUN_20250110_100000"
    }

    fn write_recon_output(store: &RunStore) {
        store
            .write_json(
                &store.recon_output_path(run()),
                &json!({
                    "records": {
                        "100000000001": {"status": "MATCHED", "cycle_id": "1C"},
                        "100000000002": {"status": "MATCHED", "cycle_id": "2C"},
                        "100000000003": {"status": "ORPHAN", "cycle_id": "1C"},
                    },
                    "summary": {"matched": {"count": 2}},
                }),
            )
            .unwrap();
    }

    fn write_accounting_output(store: &RunStore) {
        store
            .write_json(
                &store.accounting_output_path(run()),
                &json!({
                    "run_id": run(),
                    "vouchers": [
                        {
                            "voucher_id": "VOUCHER_000001",
                            "status": VOUCHER_GENERATED,
                            "gl_entries": [{"entry_id": "GL_00000001"}],
                        },
                        {
                            "voucher_id": "SETTLE_000002",
                            "status": "posted",
                            "gl_entries": [{"entry_id": "GL_00000002"}],
                        }
                    ],
                }),
            )
            .unwrap();
    }

    #[test]
    fn test_mid_recon_rollback_restores_selected() {
        let (_dir, manager, store) = setup();
        write_recon_output(&store);

        let outcome = manager
            .mid_recon_rollback(run(), "db connection lost", Some(&["100000000001".to_string()]), Utc::now())
            .unwrap();

        assert_eq!(outcome.status, RollbackStatus::Completed);
        assert_eq!(outcome.transactions_restored, 1);
        assert!(outcome.backup_path.as_ref().unwrap().exists());

        let value: Value = store.read_json(&store.recon_output_path(run())).unwrap().unwrap();
        assert_eq!(value["records"]["100000000001"]["status"], "UNKNOWN");
        assert_eq!(
            value["records"]["100000000001"]["rollback_metadata"]["previous_status"],
            "MATCHED"
        );
        // Untargeted records untouched
        assert_eq!(value["records"]["100000000002"]["status"], "MATCHED");
        assert_eq!(value["records"]["100000000003"]["status"], "ORPHAN");
    }

    #[test]
    fn test_mid_recon_rollback_all_matched_when_no_list() {
        let (_dir, manager, store) = setup();
        write_recon_output(&store);

        let outcome = manager
            .mid_recon_rollback(run(), "full restore", None, Utc::now())
            .unwrap();
        assert_eq!(outcome.transactions_restored, 2);
    }

    #[test]
    fn test_cycle_wise_rollback_targets_one_cycle() {
        let (_dir, manager, store) = setup();
        write_recon_output(&store);

        let outcome = manager.cycle_wise_rollback(run(), "1C", Utc::now()).unwrap();
        assert_eq!(outcome.transactions_restored, 1);

        let value: Value = store.read_json(&store.recon_output_path(run())).unwrap().unwrap();
        assert_eq!(value["records"]["100000000001"]["status"], "UNKNOWN");
        assert_eq!(value["records"]["100000000002"]["status"], "MATCHED");
    }

    #[test]
    fn test_cycle_wise_rejects_invalid_cycle() {
        let (_dir, manager, store) = setup();
        write_recon_output(&store);
        let err = manager.cycle_wise_rollback(run(), "9Z", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_accounting_rollback_resets_generated_vouchers() {
        let (_dir, manager, store) = setup();
        write_accounting_output(&store);

        let outcome = manager
            .accounting_rollback(run(), "CBS upload failure", None, Utc::now())
            .unwrap();
        assert_eq!(outcome.vouchers_reset, vec!["VOUCHER_000001"]);

        let value: Value = store
            .read_json(&store.accounting_output_path(run()))
            .unwrap()
            .unwrap();
        let voucher = &value["vouchers"][0];
        assert_eq!(voucher["status"], MATCHED_PENDING);
        assert_eq!(voucher["gl_entries"], json!([]));
        assert_eq!(
            voucher["rollback_metadata"]["previous_gl_entries"][0]["entry_id"],
            "GL_00000001"
        );
        // Posted voucher untouched
        assert_eq!(value["vouchers"][1]["status"], "posted");
        assert_eq!(value["accounting_status"]["status"], "rolled_back");
    }

    #[test]
    fn test_accounting_rollback_requires_reason() {
        let (_dir, manager, store) = setup();
        write_accounting_output(&store);
        let err = manager
            .accounting_rollback(run(), "  ", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_download_lock_blocks_accounting_rollback() {
        let (_dir, manager, store) = setup();
        write_accounting_output(&store);
        store
            .write_json(
                &store.download_meta_path(run()),
                &DownloadMeta {
                    is_downloaded: true,
                    downloaded_at: Some(Utc::now()),
                    downloaded_by: Some("ops1".to_string()),
                },
            )
            .unwrap();

        let err = manager
            .accounting_rollback(run(), "CBS upload failure", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
        assert!(err.to_string().contains("downloaded"));
    }

    #[test]
    fn test_ingestion_rollback_removes_file_and_updates_metadata() {
        let (_dir, manager, store) = setup();
        store
            .save_upload(run(), "1C", None, "switch.csv", b"RRN\n1\n")
            .unwrap();
        store
            .write_json(
                &store.metadata_path(run()),
                &json!({
                    "run_id": run(),
                    "uploaded_files": {
                        "switch": {"stored_name": "switch.csv", "original_name": "sw.csv"}
                    }
                }),
            )
            .unwrap();

        let outcome = manager
            .ingestion_rollback(run(), "switch.csv", "empty file", Utc::now())
            .unwrap();
        assert_eq!(outcome.removed_file.as_deref(), Some("switch.csv"));

        let metadata: Value = store.read_json(&store.metadata_path(run())).unwrap().unwrap();
        assert!(metadata["uploaded_files"].as_object().unwrap().is_empty());
        assert_eq!(metadata["rollback_history"][0]["removed_file"], "switch.csv");
    }

    #[test]
    fn test_whole_process_rollback_deletes_run() {
        let (_dir, manager, store) = setup();
        write_recon_output(&store);

        let outcome = manager.whole_process_rollback(run(), Utc::now()).unwrap();
        assert_eq!(outcome.status, RollbackStatus::Completed);
        assert!(!store.run_exists(run()));

        // History survives the run deletion
        let history = manager.history(Some(run())).unwrap();
        assert_eq!(history.last().unwrap().status, RollbackStatus::Completed);
    }

    #[test]
    fn test_missing_artifacts_block_rollback() {
        let (_dir, manager, _store) = setup();
        let err = manager
            .mid_recon_rollback(run(), "no output", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));

        let err = manager
            .accounting_rollback(run(), "no output", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let (_dir, manager, _store) = setup();
        let err = manager
            .whole_process_rollback("RUN_19990101_000000", Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_validation_blocks_once_output_removed() {
        let (_dir, manager, store) = setup();
        write_recon_output(&store);
        std::fs::remove_file(store.recon_output_path(run())).unwrap();
        let err = manager.cycle_wise_rollback(run(), "1C", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::State(_)));
        // Nothing was logged for the refused operation
        assert!(manager.history(Some(run())).unwrap().is_empty());
    }
}
