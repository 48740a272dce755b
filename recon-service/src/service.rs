//! The reconciliation service facade.
//!
//! One `ReconService` owns the run store, audit trail, rate limiter and the
//! per-run mutex table. A run is held by one worker through the entire
//! pipeline; unrelated runs proceed in parallel.

use crate::error::{Error, Result};
use audit::{
    AuditAction, AuditEvent, AuditFilter, AuditLevel, AuditSummary, AuditTrail, ComplianceReport,
};
use chrono::Utc;
use controls::{Proposal, ProposalStore, RollbackManager, RollbackOutcome};
use dashmap::DashMap;
use matching::{MatchInputs, MatchingSettings, StorePriorCycles, UpiMatchingEngine};
use recon_core::config::ReconConfig;
use recon_core::ingest::{self, UploadFile};
use recon_core::limits::{RateLimitResult, RateLimiterConfig, SlidingWindowLimiter};
use recon_core::store::RunStore;
use recon_core::types::{
    Direction, DownloadMeta, FileSlot, HangingState, ReconStatus, ReconSummary, RunMetadata,
    RunStatus, Source, UploadedFileMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use settlement::engine::SettlementEngine;
use settlement::reports::ReportWriter;
use settlement::ttum::TtumGenerator;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One upload request: cycle, run date, direction and the file slots
#[derive(Debug)]
pub struct UploadRequest {
    pub cycle: String,
    pub run_date: String,
    pub direction: Option<Direction>,
    pub files: Vec<UploadFile>,
}

/// Upload result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub run_id: String,
    pub upi_detected: bool,
    pub files_saved: usize,
    pub empty_rrn_rows: usize,
}

/// Reconcile result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub run_id: String,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub ttum_required_count: usize,
    pub breakdown: BTreeMap<ReconStatus, usize>,
    pub exception_types: BTreeMap<String, usize>,
    pub vouchers_generated: usize,
}

/// The `summary.json` document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummaryDoc {
    pub run_id: String,
    pub generated_at: chrono::DateTime<Utc>,
    pub cycle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub summary: ReconSummary,
}

/// Downloadable report kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Matched,
    Unmatched,
    Ageing,
    Hanging,
    Annexure,
    SwitchUpdate,
    All,
}

/// TTUM download formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtumFormat {
    Csv,
    Xlsx,
    Merged,
}

/// One downloadable artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFile {
    pub filename: String,
    pub path: PathBuf,
}

/// TTUM download result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtumResponse {
    pub files: Vec<ReportFile>,
}

/// Cycles accepted at upload time: the A/B scheme or 1C..10C
fn valid_cycle(cycle: &str) -> bool {
    const A_SCHEME: [&str; 10] = ["1A", "1B", "1C", "2A", "2B", "2C", "3A", "3B", "3C", "4"];
    if A_SCHEME.contains(&cycle) {
        return true;
    }
    cycle
        .strip_suffix('C')
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| (1..=10).contains(&n))
        .unwrap_or(false)
}

/// The reconciliation service
pub struct ReconService {
    config: ReconConfig,
    store: RunStore,
    audit: Arc<AuditTrail>,
    limiter: SlidingWindowLimiter,
    proposals: ProposalStore,
    rollbacks: RollbackManager,
    run_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReconService {
    /// Build a service over the configured data directory
    pub fn new(config: ReconConfig) -> Result<Self> {
        let store = RunStore::open(&config.data_dir)?;
        let audit = Arc::new(AuditTrail::open(config.data_dir.join("audit").join("audit.log"))?);
        let limiter = SlidingWindowLimiter::new(RateLimiterConfig {
            max_requests: config.rate_limit_max,
            window: Duration::from_secs(config.rate_limit_window_secs),
        });
        let proposals = ProposalStore::new(store.clone());
        let rollbacks = RollbackManager::new(store.clone());

        Ok(Self {
            config,
            store,
            audit,
            limiter,
            proposals,
            rollbacks,
            run_locks: DashMap::new(),
        })
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        self.run_locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn check_rate(&self, client: &str) -> Result<()> {
        match self.limiter.check(client) {
            RateLimitResult::Allowed => Ok(()),
            RateLimitResult::Denied { retry_after } => Err(Error::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            }),
        }
    }

    fn resolve_run(&self, run_id: Option<&str>) -> Result<String> {
        match run_id {
            Some(run_id) => {
                if !self.store.run_exists(run_id) {
                    return Err(recon_core::Error::NotFound(format!("Run {} not found", run_id)).into());
                }
                Ok(run_id.to_string())
            }
            None => self
                .store
                .latest_run()?
                .ok_or_else(|| recon_core::Error::NotFound("No runs available".to_string()).into()),
        }
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Persist and validate an upload. Any invalid file fails the whole
    /// upload; files already written are removed via ingestion rollback.
    pub async fn upload(&self, request: UploadRequest, user: &str) -> Result<UploadResponse> {
        if !valid_cycle(&request.cycle) {
            return Err(recon_core::Error::Validation(format!(
                "Invalid cycle '{}'",
                request.cycle
            ))
            .into());
        }
        if request.files.is_empty() {
            return Err(recon_core::Error::Validation("No files uploaded".to_string()).into());
        }

        let now = Utc::now();
        let run_id = RunStore::generate_run_id(now);
        let lock = self.run_lock(&run_id);
        let _guard = lock.lock().await;

        let mut saved: Vec<String> = Vec::new();
        for file in &request.files {
            let stored = ingest::stored_name(file.slot, &file.filename);
            let direction = file.slot.direction().or(request.direction);
            self.store
                .save_upload(&run_id, &request.cycle, direction, &stored, &file.bytes)?;
            saved.push(stored);
        }

        match ingest::ingest(&request.files, Some(request.cycle.as_str()), &self.config) {
            Ok(outcome) => {
                let uploaded_files: BTreeMap<String, UploadedFileMeta> = outcome
                    .files
                    .iter()
                    .map(|file| {
                        (
                            file.slot.as_str().to_string(),
                            UploadedFileMeta {
                                original_name: file.original_name.clone(),
                                stored_name: file.stored_name.clone(),
                                size_bytes: file.size_bytes,
                            },
                        )
                    })
                    .collect();

                let metadata = RunMetadata {
                    run_id: run_id.clone(),
                    cycle_id: request.cycle.clone(),
                    run_date: request.run_date.clone(),
                    direction: request.direction,
                    uploaded_files,
                    status: RunStatus::Uploaded,
                    created_at: now,
                };
                self.store
                    .write_json(&self.store.metadata_path(&run_id), &metadata)?;

                tracing::info!(
                    run_id = %run_id,
                    files = saved.len(),
                    upi_detected = outcome.upi_detected,
                    "upload accepted"
                );

                self.audit
                    .log(
                        AuditEvent::new(AuditAction::Upload, AuditLevel::Info, user)
                            .with_run(&run_id)
                            .with_details(json!({
                                "cycle": request.cycle,
                                "files": saved.len(),
                                "upi_detected": outcome.upi_detected,
                            })),
                    )
                    .await?;

                Ok(UploadResponse {
                    run_id,
                    upi_detected: outcome.upi_detected,
                    files_saved: saved.len(),
                    empty_rrn_rows: outcome.empty_rrn_rows,
                })
            }
            Err(rejections) => {
                // Atomic upload: remove whatever landed on disk
                for (file, stored) in request.files.iter().zip(&saved) {
                    let reason = rejections
                        .iter()
                        .find(|r| r.filename == file.filename)
                        .map(|r| r.error.clone())
                        .unwrap_or_else(|| "sibling file failed validation".to_string());
                    let _ = self
                        .rollbacks
                        .ingestion_rollback(&run_id, stored, &reason, now);
                }

                self.audit
                    .log(
                        AuditEvent::new(AuditAction::Upload, AuditLevel::Error, user)
                            .with_run(&run_id)
                            .with_details(json!({
                                "rejected_files": rejections.len(),
                            })),
                    )
                    .await?;

                Err(Error::UploadRejected(rejections))
            }
        }
    }

    // ------------------------------------------------------------------
    // Reconcile
    // ------------------------------------------------------------------

    /// Run the full pipeline for one run (default: the latest)
    pub async fn reconcile(
        &self,
        run_id: Option<&str>,
        client: &str,
        user: &str,
    ) -> Result<ReconcileResponse> {
        self.check_rate(client)?;
        let run_id = self.resolve_run(run_id)?;
        let lock = self.run_lock(&run_id);
        let _guard = lock.lock().await;

        let metadata: RunMetadata = self
            .store
            .read_json(&self.store.metadata_path(&run_id))?
            .ok_or_else(|| recon_core::Error::NotFound(format!("Run {} has no metadata", run_id)))?;

        // Reload and renormalize the persisted uploads
        let mut files = Vec::new();
        for path in self.store.list_uploads(&run_id)? {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let slot = match FileSlot::from_filename(&name) {
                Some(slot) => slot,
                None => continue,
            };
            files.push(UploadFile {
                slot,
                filename: name,
                bytes: std::fs::read(&path)?,
            });
        }

        let outcome = ingest::ingest(&files, Some(metadata.cycle_id.as_str()), &self.config)
            .map_err(Error::UploadRejected)?;

        let mut inputs = MatchInputs::default();
        for file in &outcome.files {
            if file.slot == FileSlot::Adjustment {
                continue;
            }
            for record in &file.normalized.records {
                match record.source {
                    Source::Cbs => inputs.cbs.push(record.clone()),
                    Source::Switch => inputs.switch.push(record.clone()),
                    Source::Npci => inputs.npci.push(record.clone()),
                    Source::Ntsl => inputs.ntsl.push(record.clone()),
                }
            }
        }

        let engine = UpiMatchingEngine::new(MatchingSettings::from(&self.config));
        let prior = StorePriorCycles::new(&self.store);
        let output = if outcome.upi_detected {
            engine.reconcile(&run_id, inputs, &prior)?
        } else {
            engine.reconcile_legacy(&run_id, inputs, &prior)?
        };

        let now = Utc::now();
        self.store
            .write_json(&self.store.recon_output_path(&run_id), &output)?;

        let summary_doc = RunSummaryDoc {
            run_id: run_id.clone(),
            generated_at: now,
            cycle_id: metadata.cycle_id.clone(),
            direction: metadata.direction,
            summary: output.summary.clone(),
        };
        self.store
            .write_json(&self.store.summary_path(&run_id), &summary_doc)?;

        self.store.write_json(
            &self.store.hanging_state_path(&run_id),
            &HangingState {
                hanging: output.hanging.clone(),
                generated_at: now.to_rfc3339(),
            },
        )?;

        // Settlement artifacts
        let mut settle = SettlementEngine::new(self.config.gl.clone(), self.config.amount_tolerance);
        let generation = settle.generate_vouchers(&output, now)?;
        let posting = settle.post_vouchers(None, now);
        self.store.write_json(
            &self.store.accounting_output_path(&run_id),
            &settle.accounting_output(&run_id, now),
        )?;

        let ttum_set = TtumGenerator::new(self.config.gl.clone()).generate(&output, now.date_naive());
        let writer = ReportWriter::new(&self.store, &run_id);
        writer.write_ttum_csvs(&ttum_set)?;
        writer.write_ttum_xlsx(&ttum_set)?;
        writer.write_all(&output, now.date_naive())?;
        writer.gl_statement_csv(settle.vouchers())?;

        let mut metadata = metadata;
        metadata.status = RunStatus::Reconciled;
        self.store
            .write_json(&self.store.metadata_path(&run_id), &metadata)?;

        tracing::info!(
            run_id = %run_id,
            records = output.records.len(),
            matched = output.summary.matched.count,
            vouchers = generation.vouchers_generated,
            "reconciliation pipeline complete"
        );

        self.audit
            .log(
                AuditEvent::new(AuditAction::ReconEvent, AuditLevel::Info, user)
                    .with_run(&run_id)
                    .with_details(json!({
                        "records": output.records.len(),
                        "matched": output.summary.matched.count,
                        "unmatched": output.summary.unmatched.count,
                        "vouchers": generation.vouchers_generated,
                        "posted": posting.posted_count,
                        "ttum_rows": ttum_set.total_rows(),
                    })),
            )
            .await?;

        Ok(ReconcileResponse {
            run_id,
            matched_count: output.summary.matched.count,
            unmatched_count: output.summary.unmatched.count,
            ttum_required_count: output.summary.ttum_required,
            breakdown: output.summary.breakdown.clone(),
            exception_types: output.summary.exception_types.clone(),
            vouchers_generated: generation.vouchers_generated,
        })
    }

    // ------------------------------------------------------------------
    // Summaries and reports
    // ------------------------------------------------------------------

    /// Summary of the latest reconciled run
    pub async fn latest_summary(&self) -> Result<RunSummaryDoc> {
        let run_id = self.resolve_run(None)?;
        self.store
            .read_json(&self.store.summary_path(&run_id))?
            .ok_or_else(|| {
                recon_core::Error::NotFound(format!(
                    "Run {} has no summary; reconcile it first",
                    run_id
                ))
                .into()
            })
    }

    /// Fetch one generated report for a run
    pub async fn report(&self, kind: ReportKind, run_id: Option<&str>) -> Result<ReportFile> {
        let run_id = self.resolve_run(run_id)?;
        let reports = self.store.reports_dir(&run_id);

        let path = match kind {
            ReportKind::Matched => reports.join("matched.csv"),
            ReportKind::Unmatched => reports.join("unmatched.csv"),
            ReportKind::Ageing => reports.join("unmatched_ageing.csv"),
            ReportKind::Hanging => reports.join("hanging.csv"),
            ReportKind::SwitchUpdate => reports.join("switch_update.csv"),
            ReportKind::Annexure => self.store.ttum_dir(&run_id).join("annexure_iv.csv"),
            ReportKind::All => {
                let writer = ReportWriter::new(&self.store, &run_id);
                writer.zip_reports()?
            }
        };

        if !path.exists() {
            return Err(recon_core::Error::NotFound(format!(
                "Report not generated for {}; reconcile the run first",
                run_id
            ))
            .into());
        }

        Ok(ReportFile {
            filename: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            path,
        })
    }

    /// Fetch TTUM artifacts and flip the download lock
    pub async fn ttum_report(
        &self,
        format: TtumFormat,
        run_id: Option<&str>,
        user: &str,
    ) -> Result<TtumResponse> {
        let run_id = self.resolve_run(run_id)?;
        let ttum_dir = self.store.ttum_dir(&run_id);
        if !ttum_dir.exists() {
            return Err(recon_core::Error::NotFound(format!(
                "No TTUM files for {}; reconcile the run first",
                run_id
            ))
            .into());
        }

        let files: Vec<ReportFile> = match format {
            TtumFormat::Csv => {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(&ttum_dir)?
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("csv"))
                    .collect();
                entries.sort();
                entries
                    .into_iter()
                    .map(|path| ReportFile {
                        filename: path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or_default()
                            .to_string(),
                        path,
                    })
                    .collect()
            }
            TtumFormat::Xlsx => {
                let path = ttum_dir.join("ttum.xlsx");
                if !path.exists() {
                    return Err(recon_core::Error::NotFound(
                        "TTUM XLSX not generated".to_string(),
                    )
                    .into());
                }
                vec![ReportFile {
                    filename: "ttum.xlsx".to_string(),
                    path,
                }]
            }
            TtumFormat::Merged => {
                let writer = ReportWriter::new(&self.store, &run_id);
                let path = writer.zip_ttum()?;
                vec![ReportFile {
                    filename: "ttum_merged.zip".to_string(),
                    path,
                }]
            }
        };

        // Download lock: accounting rollback is refused from here on
        let now = Utc::now();
        self.store.write_json(
            &self.store.download_meta_path(&run_id),
            &DownloadMeta {
                is_downloaded: true,
                downloaded_at: Some(now),
                downloaded_by: Some(user.to_string()),
            },
        )?;

        self.audit
            .log(
                AuditEvent::new(AuditAction::Download, AuditLevel::Info, user)
                    .with_run(&run_id)
                    .with_details(json!({"format": format!("{:?}", format), "files": files.len()})),
            )
            .await?;

        Ok(TtumResponse { files })
    }

    // ------------------------------------------------------------------
    // Maker–checker force-match
    // ------------------------------------------------------------------

    pub async fn propose_force_match(
        &self,
        run_id: Option<&str>,
        rrn: &str,
        action: &str,
        reason: &str,
        maker: &str,
        client: &str,
    ) -> Result<Proposal> {
        self.check_rate(client)?;
        let run_id = self.resolve_run(run_id)?;
        let proposal = self
            .proposals
            .propose(&run_id, rrn, action, None, reason, maker, Utc::now())?;

        self.audit
            .log(
                AuditEvent::new(AuditAction::ForceMatch, AuditLevel::Info, maker)
                    .with_run(&run_id)
                    .with_details(json!({
                        "proposal_id": proposal.proposal_id,
                        "rrn": rrn,
                        "stage": "proposed",
                    })),
            )
            .await?;

        Ok(proposal)
    }

    pub async fn approve_force_match(
        &self,
        run_id: Option<&str>,
        proposal_id: &str,
        checker: &str,
        comments: Option<&str>,
    ) -> Result<Proposal> {
        let run_id = self.resolve_run(run_id)?;
        let lock = self.run_lock(&run_id);
        let _guard = lock.lock().await;

        let proposal = self
            .proposals
            .approve(&run_id, proposal_id, checker, comments, Utc::now())?;

        self.audit
            .log(
                AuditEvent::new(AuditAction::ForceMatch, AuditLevel::Info, checker)
                    .with_run(&run_id)
                    .with_details(json!({
                        "proposal_id": proposal_id,
                        "rrn": proposal.rrn,
                        "stage": "approved",
                        "maker": proposal.maker,
                    })),
            )
            .await?;

        Ok(proposal)
    }

    pub async fn reject_force_match(
        &self,
        run_id: Option<&str>,
        proposal_id: &str,
        checker: &str,
        comments: Option<&str>,
    ) -> Result<Proposal> {
        let run_id = self.resolve_run(run_id)?;
        let proposal = self
            .proposals
            .reject(&run_id, proposal_id, checker, comments, Utc::now())?;

        self.audit
            .log(
                AuditEvent::new(AuditAction::ForceMatch, AuditLevel::Info, checker)
                    .with_run(&run_id)
                    .with_details(json!({
                        "proposal_id": proposal_id,
                        "stage": "rejected",
                    })),
            )
            .await?;

        Ok(proposal)
    }

    pub fn list_proposals(&self, run_id: &str) -> Result<Vec<Proposal>> {
        Ok(self.proposals.list(run_id)?)
    }

    // ------------------------------------------------------------------
    // Rollbacks
    // ------------------------------------------------------------------

    async fn audit_rollback(&self, run_id: &str, user: &str, outcome: &RollbackOutcome) -> Result<()> {
        self.audit
            .log(
                AuditEvent::new(AuditAction::Rollback, AuditLevel::Warning, user)
                    .with_run(run_id)
                    .with_details(json!({
                        "rollback_id": outcome.rollback_id,
                        "message": outcome.message,
                        "transactions_restored": outcome.transactions_restored,
                    })),
            )
            .await?;
        Ok(())
    }

    pub async fn rollback_ingestion(
        &self,
        run_id: &str,
        failed_filename: &str,
        validation_error: &str,
        user: &str,
    ) -> Result<RollbackOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;
        let outcome =
            self.rollbacks
                .ingestion_rollback(run_id, failed_filename, validation_error, Utc::now())?;
        self.audit_rollback(run_id, user, &outcome).await?;
        Ok(outcome)
    }

    pub async fn rollback_mid_recon(
        &self,
        run_id: &str,
        reason: &str,
        affected_rrns: Option<&[String]>,
        user: &str,
    ) -> Result<RollbackOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;
        let outcome = self
            .rollbacks
            .mid_recon_rollback(run_id, reason, affected_rrns, Utc::now())?;
        self.audit_rollback(run_id, user, &outcome).await?;
        Ok(outcome)
    }

    pub async fn rollback_cycle_wise(
        &self,
        run_id: &str,
        cycle_id: &str,
        user: &str,
    ) -> Result<RollbackOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;
        let outcome = self.rollbacks.cycle_wise_rollback(run_id, cycle_id, Utc::now())?;
        self.audit_rollback(run_id, user, &outcome).await?;
        Ok(outcome)
    }

    pub async fn rollback_accounting(
        &self,
        run_id: &str,
        reason: &str,
        voucher_ids: Option<&[String]>,
        user: &str,
    ) -> Result<RollbackOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;
        let outcome = self
            .rollbacks
            .accounting_rollback(run_id, reason, voucher_ids, Utc::now())?;
        self.audit_rollback(run_id, user, &outcome).await?;
        Ok(outcome)
    }

    pub async fn rollback_whole_process(&self, run_id: &str, user: &str) -> Result<RollbackOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;
        let outcome = self.rollbacks.whole_process_rollback(run_id, Utc::now())?;
        self.audit_rollback(run_id, user, &outcome).await?;
        Ok(outcome)
    }

    pub fn rollback_history(&self, run_id: Option<&str>) -> Result<Vec<controls::rollback::RollbackRecord>> {
        Ok(self.rollbacks.history(run_id)?)
    }

    // ------------------------------------------------------------------
    // Audit queries
    // ------------------------------------------------------------------

    pub async fn audit_trail(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        Ok(self.audit.query(filter).await?)
    }

    pub async fn audit_summary(&self, filter: &AuditFilter) -> Result<AuditSummary> {
        Ok(self.audit.summary(filter).await?)
    }

    pub async fn audit_compliance(&self, run_id: Option<&str>) -> Result<ComplianceReport> {
        Ok(self.audit.compliance_report(run_id).await?)
    }
}
