//! Full-pipeline workflows: upload → reconcile → artifacts → maker–checker
//! and rollback behavior, exercised through the service facade.

use audit::{AuditAction, AuditFilter};
use recon_core::config::ReconConfig;
use recon_core::ingest::UploadFile;
use recon_core::types::{FileSlot, ReconStatus};
use recon_service::{Error, ReconService, ReportKind, TtumFormat, UploadRequest};
use serde_json::Value;

const CBS_CSV: &[u8] = b"RRN,Amount,Tran_Date,Dr_Cr,RC,Tran_Type,UPI_Tran_ID\n\
    100000000001,1000.00,2025-01-10 10:00:00,C,00,U2,UPI0001\n\
    100000000002,500.00,2025-01-10 11:00:00,D,00,U2,UPI0002\n";
const SWITCH_CSV: &[u8] = b"RRN,Amount,Tran_Date,Dr_Cr,RC,Tran_Type,UPI_Tran_ID\n\
    100000000001,1000.00,2025-01-10 10:00:00,C,00,U2,UPI0001\n";
const NPCI_CSV: &[u8] = b"RRN,Amount,Tran_Date,RC,Tran_Type,UPI_Tran_ID\n\
    100000000001,1000.00,2025-01-10 10:00:00,00,U2,UPI0001\n";

fn upload_file(slot: FileSlot, name: &str, bytes: &[u8]) -> UploadFile {
    UploadFile {
        slot,
        filename: name.to_string(),
        bytes: bytes.to_vec(),
    }
}

fn request() -> UploadRequest {
    UploadRequest {
        cycle: "1C".to_string(),
        run_date: "2025-01-10".to_string(),
        direction: None,
        files: vec![
            upload_file(FileSlot::CbsInward, "cbs_inward.csv", CBS_CSV),
            upload_file(FileSlot::Switch, "switch.csv", SWITCH_CSV),
            upload_file(FileSlot::NpciInward, "npci_inward.csv", NPCI_CSV),
        ],
    }
}

fn service(dir: &tempfile::TempDir) -> ReconService {
    let mut config = ReconConfig::default();
    config.data_dir = dir.path().join("runs");
    config.rate_limit_max = 100;
    ReconService::new(config).unwrap()
}

async fn reconciled_run(service: &ReconService) -> String {
    let upload = service.upload(request(), "maker1").await.unwrap();
    service
        .reconcile(Some(&upload.run_id), "10.0.0.1", "maker1")
        .await
        .unwrap();
    upload.run_id
}

/// Maker–checker force-match: maker cannot approve their own proposal
#[tokio::test]
async fn workflow_force_match_maker_checker() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    // 100000000002 is an orphan after reconcile
    let proposal = service
        .propose_force_match(
            Some(&run_id),
            "100000000002",
            "force_match",
            "counterparty confirmed",
            "maker1",
            "10.0.0.1",
        )
        .await
        .unwrap();

    // Self approval is a conflict
    let err = service
        .approve_force_match(Some(&run_id), &proposal.proposal_id, "maker1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Controls(controls::Error::Conflict(_))));

    // Another user approves and the record flips
    service
        .approve_force_match(Some(&run_id), &proposal.proposal_id, "checker1", Some("ok"))
        .await
        .unwrap();

    let output: Value = service
        .store()
        .read_json(&service.store().recon_output_path(&run_id))
        .unwrap()
        .unwrap();
    assert_eq!(output["records"]["100000000002"]["status"], "FORCE_MATCHED");
    assert_eq!(
        output["records"]["100000000002"]["force_matched_by"],
        "checker1"
    );

    // Both stages audited with distinct actors
    let events = service
        .audit_trail(&AuditFilter {
            run_id: Some(run_id.clone()),
            action: Some(AuditAction::ForceMatch),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_ne!(events[0].user_id, events[1].user_id);
}

/// Accounting rollback resets vouchers, then the download lock blocks it
#[tokio::test]
async fn workflow_accounting_rollback_and_download_lock() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    let outcome = service
        .rollback_accounting(&run_id, "CBS upload failure", None, "ops1")
        .await
        .unwrap();
    assert!(!outcome.vouchers_reset.is_empty());
    assert!(outcome.backup_path.as_ref().unwrap().exists());

    // No voucher remains in the generated state
    let accounting: Value = service
        .store()
        .read_json(&service.store().accounting_output_path(&run_id))
        .unwrap()
        .unwrap();
    for voucher in accounting["vouchers"].as_array().unwrap() {
        assert_ne!(voucher["status"], "voucher_generated");
        assert_eq!(voucher["gl_entries"], serde_json::json!([]));
    }

    // Reconcile again so fresh vouchers exist, then download the TTUMs
    service
        .reconcile(Some(&run_id), "10.0.0.1", "maker1")
        .await
        .unwrap();
    let ttum = service
        .ttum_report(TtumFormat::Merged, Some(&run_id), "ops1")
        .await
        .unwrap();
    assert_eq!(ttum.files.len(), 1);

    let err = service
        .rollback_accounting(&run_id, "CBS upload failure", None, "ops1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Controls(controls::Error::State(_))));
    assert!(err.to_string().contains("downloaded"));
}

/// Reconcile twice on the same inputs yields identical classifications
#[tokio::test]
async fn workflow_reconcile_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    let first: Value = service
        .store()
        .read_json(&service.store().recon_output_path(&run_id))?
        .expect("recon output present");

    service.reconcile(Some(&run_id), "10.0.0.1", "maker1").await?;

    let second: Value = service
        .store()
        .read_json(&service.store().recon_output_path(&run_id))?
        .expect("recon output present");

    assert_eq!(first["records"], second["records"]);
    assert_eq!(first["summary"], second["summary"]);
    Ok(())
}

/// Whole-process rollback, re-upload and reconcile reproduce the statuses
#[tokio::test]
async fn workflow_whole_process_rollback_then_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    let original: Value = service
        .store()
        .read_json(&service.store().recon_output_path(&run_id))
        .unwrap()
        .unwrap();

    service
        .rollback_whole_process(&run_id, "ops1")
        .await
        .unwrap();
    assert!(!service.store().run_exists(&run_id));

    let rerun_id = reconciled_run(&service).await;
    let rerun: Value = service
        .store()
        .read_json(&service.store().recon_output_path(&rerun_id))
        .unwrap()
        .unwrap();

    assert_eq!(original["records"], rerun["records"]);
}

/// Mid-recon rollback moves matched records back and annotates them
#[tokio::test]
async fn workflow_mid_recon_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    let outcome = service
        .rollback_mid_recon(
            &run_id,
            "operator requested re-run",
            Some(&["100000000001".to_string()]),
            "ops1",
        )
        .await
        .unwrap();
    assert_eq!(outcome.transactions_restored, 1);

    let output: Value = service
        .store()
        .read_json(&service.store().recon_output_path(&run_id))
        .unwrap()
        .unwrap();
    let record = &output["records"]["100000000001"];
    assert_eq!(record["status"], "UNKNOWN");
    assert_eq!(record["rollback_metadata"]["previous_status"], "MATCHED");
}

/// Every pipeline step leaves an audit trace with an intact hash chain
#[tokio::test]
async fn workflow_audit_trail_covers_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    service
        .ttum_report(TtumFormat::Xlsx, Some(&run_id), "ops1")
        .await
        .unwrap();

    let summary = service.audit_summary(&AuditFilter::default()).await.unwrap();
    assert!(summary.by_action.contains_key("UPLOAD"));
    assert!(summary.by_action.contains_key("RECON_EVENT"));
    assert!(summary.by_action.contains_key("DOWNLOAD"));

    let compliance = service.audit_compliance(None).await.unwrap();
    assert!(compliance.chain_intact);
    assert_eq!(compliance.runs_touched[&run_id], 3);
}

/// The generated reports reflect the classification
#[tokio::test]
async fn workflow_reports_reflect_classification() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let run_id = reconciled_run(&service).await;

    let summary = service.latest_summary().await.unwrap();
    assert_eq!(summary.summary.breakdown[&ReconStatus::Matched], 1);
    assert_eq!(summary.summary.breakdown[&ReconStatus::Orphan], 1);

    let matched = service.report(ReportKind::Matched, Some(&run_id)).await.unwrap();
    let matched_text = std::fs::read_to_string(&matched.path).unwrap();
    assert!(matched_text.contains("100000000001"));
    assert!(!matched_text.contains("100000000002"));

    let unmatched = service
        .report(ReportKind::Unmatched, Some(&run_id))
        .await
        .unwrap();
    let unmatched_text = std::fs::read_to_string(&unmatched.path).unwrap();
    assert!(unmatched_text.contains("100000000002"));

    let annexure = service
        .report(ReportKind::Annexure, Some(&run_id))
        .await
        .unwrap();
    let annexure_text = std::fs::read_to_string(&annexure.path).unwrap();
    assert!(annexure_text.starts_with("Bankadjref,Flag,shtdat"));
}
