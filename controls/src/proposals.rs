//! Maker–checker force-match workflow.
//!
//! Proposals are persisted per run in `<run_id>_proposals.json`. Approval
//! requires a checker distinct from the maker and rewrites the RRN's
//! reconciliation record to FORCE_MATCHED, handling both persisted recon
//! output renditions (RRN-keyed map and exception array).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use recon_core::store::RunStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proposal lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Rejected,
}

/// A force-match proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub rrn: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    pub run_id: String,
    pub reason: String,
    pub maker: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// File-backed proposal store with two-person approval
pub struct ProposalStore {
    store: RunStore,
    lock: Mutex<()>,
}

impl ProposalStore {
    pub fn new(store: RunStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn list(&self, run_id: &str) -> Result<Vec<Proposal>> {
        let path = self.store.proposals_path(run_id);
        Ok(self.store.read_json(&path)?.unwrap_or_default())
    }

    fn save(&self, run_id: &str, proposals: &[Proposal]) -> Result<()> {
        let path = self.store.proposals_path(run_id);
        self.store.write_json(&path, &proposals)?;
        Ok(())
    }

    /// Record a new proposal for `rrn`
    pub fn propose(
        &self,
        run_id: &str,
        rrn: &str,
        action: &str,
        direction: Option<&str>,
        reason: &str,
        maker: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal> {
        if rrn.trim().is_empty() {
            return Err(Error::Validation("RRN cannot be empty".to_string()));
        }
        if !self.store.run_exists(run_id) {
            return Err(Error::NotFound(format!("Run {} not found", run_id)));
        }

        let _guard = self.lock.lock();

        let proposal = Proposal {
            proposal_id: format!("FM_{}", Uuid::new_v4().simple()),
            rrn: rrn.to_string(),
            action: action.to_string(),
            direction: direction.map(|d| d.to_string()),
            run_id: run_id.to_string(),
            reason: reason.to_string(),
            maker: maker.to_string(),
            status: ProposalStatus::Proposed,
            created_at: now,
            checker: None,
            decided_at: None,
            comments: None,
        };

        let mut proposals = self.list(run_id)?;
        proposals.push(proposal.clone());
        self.save(run_id, &proposals)?;

        tracing::info!(
            proposal_id = %proposal.proposal_id,
            rrn,
            maker,
            "force-match proposed"
        );
        Ok(proposal)
    }

    /// Approve a proposal; the checker must differ from the maker
    pub fn approve(
        &self,
        run_id: &str,
        proposal_id: &str,
        checker: &str,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Proposal> {
        let _guard = self.lock.lock();

        let mut proposals = self.list(run_id)?;
        let proposal = proposals
            .iter_mut()
            .find(|p| p.proposal_id == proposal_id)
            .ok_or_else(|| Error::NotFound(format!("Proposal {} not found", proposal_id)))?;

        if proposal.status != ProposalStatus::Proposed {
            return Err(Error::State(format!(
                "Proposal {} is already {:?}",
                proposal_id, proposal.status
            )));
        }
        if proposal.maker == checker {
            return Err(Error::Conflict(
                "Checker must be different from maker".to_string(),
            ));
        }

        apply_force_match(&self.store, run_id, &proposal.rrn, checker, now)?;

        proposal.status = ProposalStatus::Approved;
        proposal.checker = Some(checker.to_string());
        proposal.decided_at = Some(now);
        proposal.comments = comments.map(|c| c.to_string());
        let approved = proposal.clone();

        self.save(run_id, &proposals)?;

        tracing::info!(
            proposal_id,
            rrn = %approved.rrn,
            maker = %approved.maker,
            checker,
            "force-match approved"
        );
        Ok(approved)
    }

    /// Reject a proposal with comments
    pub fn reject(
        &self,
        run_id: &str,
        proposal_id: &str,
        checker: &str,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Proposal> {
        let _guard = self.lock.lock();

        let mut proposals = self.list(run_id)?;
        let proposal = proposals
            .iter_mut()
            .find(|p| p.proposal_id == proposal_id)
            .ok_or_else(|| Error::NotFound(format!("Proposal {} not found", proposal_id)))?;

        if proposal.status != ProposalStatus::Proposed {
            return Err(Error::State(format!(
                "Proposal {} is already {:?}",
                proposal_id, proposal.status
            )));
        }

        proposal.status = ProposalStatus::Rejected;
        proposal.checker = Some(checker.to_string());
        proposal.decided_at = Some(now);
        proposal.comments = comments.map(|c| c.to_string());
        let rejected = proposal.clone();

        self.save(run_id, &proposals)?;
        Ok(rejected)
    }
}

/// Rewrite the RRN's record to FORCE_MATCHED inside `recon_output.json`,
/// whichever rendition it uses
fn apply_force_match(
    store: &RunStore,
    run_id: &str,
    rrn: &str,
    checker: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let path = store.recon_output_path(run_id);
    let mut value: serde_json::Value = store
        .read_json(&path)?
        .ok_or_else(|| Error::State(format!("Run {} has no reconciliation output", run_id)))?;

    let stamp = |record: &mut serde_json::Value| {
        if let Some(obj) = record.as_object_mut() {
            obj.insert("status".to_string(), "FORCE_MATCHED".into());
            obj.insert("force_matched_by".to_string(), checker.into());
            obj.insert("force_matched_at".to_string(), now.to_rfc3339().into());
        }
    };

    let mut found = false;

    // Envelope rendition: records map under "records"
    if let Some(records) = value.get_mut("records").and_then(|r| r.as_object_mut()) {
        if let Some(record) = records.get_mut(rrn) {
            stamp(record);
            found = true;
        }
    }

    // Legacy rendition: bare RRN-keyed map
    if !found {
        if let Some(obj) = value.as_object_mut() {
            if obj.contains_key(rrn) {
                stamp(obj.get_mut(rrn).expect("key present"));
                found = true;
            }
        }
    }

    // Exception-array rendition
    if !found {
        if let Some(entries) = value.get_mut("exceptions").and_then(|e| e.as_array_mut()) {
            for entry in entries {
                let matches = entry
                    .get("rrn")
                    .or_else(|| entry.get("RRN"))
                    .and_then(|r| r.as_str())
                    .map(|r| r == rrn)
                    .unwrap_or(false);
                if matches {
                    stamp(entry);
                    found = true;
                }
            }
        }
    }

    if !found {
        return Err(Error::NotFound(format!(
            "RRN {} not present in reconciliation output of {}",
            rrn, run_id
        )));
    }

    store.write_json(&path, &value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, ProposalStore, RunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        std::fs::create_dir_all(store.run_dir("RUN_20250110_100000")).unwrap();
        store
            .write_json(
                &store.recon_output_path("RUN_20250110_100000"),
                &json!({
                    "records": {
                        "100000000001": {"status": "ORPHAN", "cbs": {"amount": "500.00"}}
                    }
                }),
            )
            .unwrap();
        let proposals = ProposalStore::new(store.clone());
        (dir, proposals, store)
    }

    #[test]
    fn test_full_maker_checker_flow() {
        let (_dir, proposals, store) = setup();
        let run = "RUN_20250110_100000";
        let now = Utc::now();

        let proposal = proposals
            .propose(run, "100000000001", "force_match", None, "orphan resolution", "maker1", now)
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Proposed);

        // Self-approval is a conflict
        let err = proposals
            .approve(run, &proposal.proposal_id, "maker1", None, now)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // A different checker approves
        let approved = proposals
            .approve(run, &proposal.proposal_id, "checker1", Some("ok"), now)
            .unwrap();
        assert_eq!(approved.status, ProposalStatus::Approved);
        assert_eq!(approved.checker.as_deref(), Some("checker1"));

        let value: serde_json::Value = store
            .read_json(&store.recon_output_path(run))
            .unwrap()
            .unwrap();
        let record = &value["records"]["100000000001"];
        assert_eq!(record["status"], "FORCE_MATCHED");
        assert_eq!(record["force_matched_by"], "checker1");

        // Double approval is rejected
        let err = proposals
            .approve(run, &proposal.proposal_id, "checker2", None, now)
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn test_rejection_keeps_recon_output_untouched() {
        let (_dir, proposals, store) = setup();
        let run = "RUN_20250110_100000";
        let now = Utc::now();

        let proposal = proposals
            .propose(run, "100000000001", "force_match", None, "r", "maker1", now)
            .unwrap();
        let rejected = proposals
            .reject(run, &proposal.proposal_id, "checker1", Some("not convinced"), now)
            .unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);

        let value: serde_json::Value = store
            .read_json(&store.recon_output_path(run))
            .unwrap()
            .unwrap();
        assert_eq!(value["records"]["100000000001"]["status"], "ORPHAN");
    }

    #[test]
    fn test_legacy_map_rendition() {
        let (_dir, proposals, store) = setup();
        let run = "RUN_20250110_100000";
        store
            .write_json(
                &store.recon_output_path(run),
                &json!({"100000000002": {"status": "ORPHAN"}}),
            )
            .unwrap();

        let now = Utc::now();
        let proposal = proposals
            .propose(run, "100000000002", "force_match", None, "r", "maker1", now)
            .unwrap();
        proposals
            .approve(run, &proposal.proposal_id, "checker1", None, now)
            .unwrap();

        let value: serde_json::Value = store
            .read_json(&store.recon_output_path(run))
            .unwrap()
            .unwrap();
        assert_eq!(value["100000000002"]["status"], "FORCE_MATCHED");
    }

    #[test]
    fn test_exception_array_rendition() {
        let (_dir, proposals, store) = setup();
        let run = "RUN_20250110_100000";
        store
            .write_json(
                &store.recon_output_path(run),
                &json!({
                    "summary": {},
                    "exceptions": [
                        {"rrn": "100000000003", "status": "MISMATCH"},
                        {"rrn": "100000000004", "status": "ORPHAN"}
                    ]
                }),
            )
            .unwrap();

        let now = Utc::now();
        let proposal = proposals
            .propose(run, "100000000003", "force_match", None, "r", "maker1", now)
            .unwrap();
        proposals
            .approve(run, &proposal.proposal_id, "checker1", None, now)
            .unwrap();

        let value: serde_json::Value = store
            .read_json(&store.recon_output_path(run))
            .unwrap()
            .unwrap();
        assert_eq!(value["exceptions"][0]["status"], "FORCE_MATCHED");
        assert_eq!(value["exceptions"][1]["status"], "ORPHAN");
    }

    #[test]
    fn test_unknown_rrn_fails_approval() {
        let (_dir, proposals, _store) = setup();
        let run = "RUN_20250110_100000";
        let now = Utc::now();

        let proposal = proposals
            .propose(run, "999999999999", "force_match", None, "r", "maker1", now)
            .unwrap();
        let err = proposals
            .approve(run, &proposal.proposal_id, "checker1", None, now)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_propose_requires_existing_run() {
        let (_dir, proposals, _store) = setup();
        let err = proposals
            .propose("RUN_19990101_000000", "1", "force_match", None, "r", "m", Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
