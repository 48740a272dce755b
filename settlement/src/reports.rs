//! Report suite for one run: matched/unmatched listings, ageing buckets,
//! hanging, switch-update, pairwise comparisons, GL statement, TTUM file
//! rendering (CSV and XLSX) and zipped bundles.

use crate::annexure;
use crate::error::{Error, Result};
use crate::ttum::{self, TtumSet};
use crate::types::Voucher;
use chrono::NaiveDate;
use recon_core::store::RunStore;
use recon_core::types::{MatchException, ReconOutput, ReconStatus, SourceLeg, TtumCategory};
use rust_xlsxwriter::Workbook;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

/// Writes the report suite for one run through the store's atomic writer
pub struct ReportWriter<'a> {
    store: &'a RunStore,
    run_id: &'a str,
}

/// Ageing buckets for unmatched listings
fn age_bucket(age_days: i64) -> &'static str {
    if age_days <= 7 {
        "0-7"
    } else if age_days <= 30 {
        "8-30"
    } else {
        ">30"
    }
}

fn csv_bytes(headers: &[&str], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.into_inner().map_err(|e| Error::Csv(e.to_string()))
}

fn leg_amount(leg: &Option<SourceLeg>) -> String {
    leg.as_ref().map(|l| l.amount.to_string()).unwrap_or_default()
}

impl<'a> ReportWriter<'a> {
    pub fn new(store: &'a RunStore, run_id: &'a str) -> Self {
        Self { store, run_id }
    }

    fn reports_dir(&self) -> PathBuf {
        self.store.reports_dir(self.run_id)
    }

    fn write_report(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.reports_dir().join(name);
        self.store.write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Write the full CSV report suite; returns the paths written
    pub fn write_all(&self, output: &ReconOutput, as_of: NaiveDate) -> Result<Vec<PathBuf>> {
        let mut paths = vec![
            self.matched_csv(output)?,
            self.unmatched_csv(output)?,
            self.ageing_csv(output, as_of)?,
            self.hanging_csv(output)?,
            self.switch_update_csv(output)?,
        ];
        paths.extend(self.pairwise_csvs(output)?);
        tracing::info!(run_id = self.run_id, reports = paths.len(), "report suite written");
        Ok(paths)
    }

    fn listing_rows<F>(&self, output: &ReconOutput, mut predicate: F) -> Vec<Vec<String>>
    where
        F: FnMut(&ReconStatus) -> bool,
    {
        output
            .records
            .iter()
            .filter(|(_, rec)| predicate(&rec.status))
            .map(|(rrn, rec)| {
                let leg = rec.primary_leg();
                vec![
                    rrn.clone(),
                    leg.map(|l| l.amount.to_string()).unwrap_or_default(),
                    leg.map(|l| l.date.format("%Y-%m-%d").to_string()).unwrap_or_default(),
                    leg.and_then(|l| l.dr_cr).map(|d| d.as_str().to_string()).unwrap_or_default(),
                    leg.map(|l| l.rc.clone()).unwrap_or_default(),
                    leg.map(|l| l.tran_type.clone()).unwrap_or_default(),
                    rec.status.to_string(),
                ]
            })
            .collect()
    }

    const LISTING_HEADERS: [&'static str; 7] =
        ["RRN", "Amount", "Tran_Date", "Dr_Cr", "RC", "Tran_Type", "Status"];

    pub fn matched_csv(&self, output: &ReconOutput) -> Result<PathBuf> {
        let rows = self.listing_rows(output, |status| {
            matches!(status, ReconStatus::Matched | ReconStatus::ForceMatched)
        });
        self.write_report("matched.csv", &csv_bytes(&Self::LISTING_HEADERS, &rows)?)
    }

    pub fn unmatched_csv(&self, output: &ReconOutput) -> Result<PathBuf> {
        let rows = self.listing_rows(output, |status| {
            matches!(
                status,
                ReconStatus::PartialMatch
                    | ReconStatus::PartialMismatch
                    | ReconStatus::Mismatch
                    | ReconStatus::Orphan
                    | ReconStatus::Exception
            )
        });
        self.write_report("unmatched.csv", &csv_bytes(&Self::LISTING_HEADERS, &rows)?)
    }

    /// Unmatched listing with ageing buckets (0-7, 8-30, >30 days)
    pub fn ageing_csv(&self, output: &ReconOutput, as_of: NaiveDate) -> Result<PathBuf> {
        let headers = ["RRN", "Amount", "Tran_Date", "AgeDays", "Bucket", "Status"];
        let rows: Vec<Vec<String>> = output
            .records
            .iter()
            .filter(|(_, rec)| {
                matches!(
                    rec.status,
                    ReconStatus::PartialMatch | ReconStatus::Orphan | ReconStatus::PartialMismatch
                )
            })
            .map(|(rrn, rec)| {
                let leg = rec.primary_leg();
                let date = leg.map(|l| l.date.date());
                let age = date.map(|d| (as_of - d).num_days().max(0)).unwrap_or(0);
                vec![
                    rrn.clone(),
                    leg.map(|l| l.amount.to_string()).unwrap_or_default(),
                    date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
                    age.to_string(),
                    age_bucket(age).to_string(),
                    rec.status.to_string(),
                ]
            })
            .collect();
        self.write_report("unmatched_ageing.csv", &csv_bytes(&headers, &rows)?)
    }

    /// Hanging listing; final-hanging rows carry the wait marker
    pub fn hanging_csv(&self, output: &ReconOutput) -> Result<PathBuf> {
        let headers = ["RRN", "Reason", "Final"];
        let rows: Vec<Vec<String>> = output
            .hanging
            .iter()
            .map(|rrn| {
                let reason = output
                    .records
                    .get(rrn)
                    .and_then(|rec| rec.hanging_reason.clone())
                    .unwrap_or_default();
                let is_final = output.final_hanging.contains(rrn);
                vec![rrn.clone(), reason, if is_final { "Y" } else { "N" }.to_string()]
            })
            .collect();
        self.write_report("hanging.csv", &csv_bytes(&headers, &rows)?)
    }

    /// Records the switch must re-post (CBS and NPCI agree, Switch failed)
    pub fn switch_update_csv(&self, output: &ReconOutput) -> Result<PathBuf> {
        let headers = ["RRN", "CBS_Amount", "NPCI_Amount", "Switch_RC", "Status"];
        let rows: Vec<Vec<String>> = output
            .records
            .iter()
            .filter(|(_, rec)| rec.exception == Some(MatchException::SwitchUpdate))
            .map(|(rrn, rec)| {
                vec![
                    rrn.clone(),
                    leg_amount(&rec.cbs),
                    leg_amount(&rec.npci),
                    rec.switch.as_ref().map(|l| l.rc.clone()).unwrap_or_default(),
                    rec.status.to_string(),
                ]
            })
            .collect();
        self.write_report("switch_update.csv", &csv_bytes(&headers, &rows)?)
    }

    /// Pairwise amount comparisons: GL-Switch, Switch-NPCI, GL-NPCI
    pub fn pairwise_csvs(&self, output: &ReconOutput) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        let specs: [(&str, [&str; 4], fn(&recon_core::types::ReconRecord) -> (String, String)); 3] = [
            (
                "gl_switch.csv",
                ["RRN", "CBS_Amount", "SWITCH_Amount", "Status"],
                |rec| (leg_amount(&rec.cbs), leg_amount(&rec.switch)),
            ),
            (
                "switch_npci.csv",
                ["RRN", "SWITCH_Amount", "NPCI_Amount", "Status"],
                |rec| (leg_amount(&rec.switch), leg_amount(&rec.npci)),
            ),
            (
                "gl_npci.csv",
                ["RRN", "CBS_Amount", "NPCI_Amount", "Status"],
                |rec| (leg_amount(&rec.cbs), leg_amount(&rec.npci)),
            ),
        ];

        for (name, headers, project) in specs {
            let rows: Vec<Vec<String>> = output
                .records
                .iter()
                .map(|(rrn, rec)| {
                    let (left, right) = project(rec);
                    vec![rrn.clone(), left, right, rec.status.to_string()]
                })
                .collect();
            paths.push(self.write_report(name, &csv_bytes(&headers, &rows)?)?);
        }

        Ok(paths)
    }

    /// GL statement over the run's vouchers
    pub fn gl_statement_csv(&self, vouchers: &[Voucher]) -> Result<PathBuf> {
        let headers = ["Voucher_ID", "RRN", "Voucher_Type", "Amount", "Status", "Created_At"];
        let rows: Vec<Vec<String>> = vouchers
            .iter()
            .map(|v| {
                vec![
                    v.voucher_id.clone(),
                    v.rrn.clone().unwrap_or_default(),
                    v.voucher_type.to_string(),
                    v.amount.to_string(),
                    format!("{:?}", v.status).to_lowercase(),
                    v.created_at.to_rfc3339(),
                ]
            })
            .collect();
        self.write_report("gl_statement.csv", &csv_bytes(&headers, &rows)?)
    }

    // ------------------------------------------------------------------
    // TTUM artifacts
    // ------------------------------------------------------------------

    /// One CSV per category under `<run>/ttum/`, plus the Annexure-IV CSV
    pub fn write_ttum_csvs(&self, set: &TtumSet) -> Result<BTreeMap<TtumCategory, PathBuf>> {
        let ttum_dir = self.store.ttum_dir(self.run_id);
        let mut written = BTreeMap::new();

        for (category, rows) in &set.rows {
            let path = ttum_dir.join(format!("{}.csv", category.as_str().to_lowercase()));
            self.store.write_atomic(&path, &ttum::to_csv_bytes(rows)?)?;
            written.insert(*category, path);
        }

        let annexure_path = ttum_dir.join("annexure_iv.csv");
        self.store
            .write_atomic(&annexure_path, &annexure::to_csv_bytes(&set.annexure)?)?;

        Ok(written)
    }

    /// XLSX rendition of the TTUM categories, one sheet per category
    pub fn write_ttum_xlsx(&self, set: &TtumSet) -> Result<PathBuf> {
        let mut workbook = Workbook::new();

        for (category, rows) in &set.rows {
            let sheet = workbook.add_worksheet();
            sheet.set_name(category.as_str())?;
            for (col, header) in ttum::TTUM_HEADERS.iter().enumerate() {
                sheet.write_string(0, col as u16, *header)?;
            }
            for (row_idx, row) in rows.iter().enumerate() {
                for (col, value) in row.fields().iter().enumerate() {
                    sheet.write_string(row_idx as u32 + 1, col as u16, value)?;
                }
            }
        }

        let path = self.store.ttum_dir(self.run_id).join("ttum.xlsx");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        workbook.save(&path)?;
        Ok(path)
    }

    /// Bundle every report CSV into a single archive
    pub fn zip_reports(&self) -> Result<PathBuf> {
        let dir = self.reports_dir();
        let path = dir.join("all_reports.zip");
        self.zip_directory(&dir, &path, "zip")
    }

    /// Bundle the TTUM CSVs (and Annexure) into one archive
    pub fn zip_ttum(&self) -> Result<PathBuf> {
        let dir = self.store.ttum_dir(self.run_id);
        let path = dir.join("ttum_merged.zip");
        self.zip_directory(&dir, &path, "zip")
    }

    fn zip_directory(&self, dir: &PathBuf, target: &PathBuf, skip_ext: &str) -> Result<PathBuf> {
        if !dir.exists() {
            return Err(Error::Report(format!("Nothing to bundle in {}", dir.display())));
        }

        let file = std::fs::File::create(target)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext != skip_ext && ext != "tmp")
                        .unwrap_or(false)
            })
            .collect();
        entries.sort();

        for path in entries {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Report("Unreadable file name".to_string()))?;
            zip.start_file(name, options)?;
            zip.write_all(&std::fs::read(&path)?)?;
        }

        zip.finish()?;
        Ok(target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttum::TtumGenerator;
    use chrono::Utc;
    use recon_core::config::GlConfig;
    use recon_core::types::{DrCr, ReconRecord};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap as Map;

    fn sample_output() -> ReconOutput {
        let leg = |amount, dr_cr| SourceLeg {
            amount,
            date: NaiveDate::from_ymd_opt(2025, 1, 10)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            dr_cr,
            rc: "00".to_string(),
            tran_type: "U2".to_string(),
        };

        let mut records: Map<String, ReconRecord> = Map::new();

        let mut matched = ReconRecord::empty();
        matched.status = ReconStatus::Matched;
        matched.cbs = Some(leg(dec!(1000.00), Some(DrCr::Credit)));
        matched.switch = Some(leg(dec!(1000.00), Some(DrCr::Credit)));
        matched.npci = Some(leg(dec!(1000.00), None));
        records.insert("100000000001".to_string(), matched);

        let mut orphan = ReconRecord::empty();
        orphan.status = ReconStatus::Orphan;
        orphan.cbs = Some(leg(dec!(500.00), Some(DrCr::Debit)));
        records.insert("100000000002".to_string(), orphan);

        let mut hanging = ReconRecord::empty();
        hanging.status = ReconStatus::Hanging;
        hanging.hanging_reason = Some("cut_off_time".to_string());
        hanging.npci = Some(leg(dec!(25.00), None));
        records.insert("100000000003".to_string(), hanging);

        ReconOutput {
            run_id: "RUN_20250110_100000".to_string(),
            generated_at: Utc::now(),
            summary: Default::default(),
            records,
            exceptions: vec![],
            ttum_candidates: vec![],
            hanging: vec!["100000000003".to_string()],
            final_hanging: vec![],
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()
    }

    #[test]
    fn test_report_suite_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let writer = ReportWriter::new(&store, "RUN_20250110_100000");

        let paths = writer.write_all(&sample_output(), as_of()).unwrap();
        assert_eq!(paths.len(), 8);
        for path in &paths {
            assert!(path.exists(), "{} missing", path.display());
        }

        let matched = std::fs::read_to_string(store.reports_dir("RUN_20250110_100000").join("matched.csv")).unwrap();
        assert!(matched.contains("100000000001"));
        assert!(!matched.contains("100000000002"));
    }

    #[test]
    fn test_ageing_buckets() {
        assert_eq!(age_bucket(0), "0-7");
        assert_eq!(age_bucket(7), "0-7");
        assert_eq!(age_bucket(8), "8-30");
        assert_eq!(age_bucket(30), "8-30");
        assert_eq!(age_bucket(31), ">30");

        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let writer = ReportWriter::new(&store, "RUN_20250110_100000");
        let path = writer.ageing_csv(&sample_output(), as_of()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        // 2025-01-10 → 2025-01-20 is 10 days
        assert!(text.contains("10,8-30"));
    }

    #[test]
    fn test_hanging_csv_flags_final_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let writer = ReportWriter::new(&store, "RUN_20250110_100000");

        let mut output = sample_output();
        output.final_hanging = vec!["100000000003".to_string()];
        let path = writer.hanging_csv(&output).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("100000000003,cut_off_time,Y"));
    }

    #[test]
    fn test_ttum_csvs_and_zip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let writer = ReportWriter::new(&store, "RUN_20250110_100000");

        let set = TtumGenerator::new(GlConfig::default()).generate(&sample_output(), as_of());
        let written = writer.write_ttum_csvs(&set).unwrap();
        assert_eq!(written.len(), TtumCategory::ALL.len());

        let xlsx = writer.write_ttum_xlsx(&set).unwrap();
        assert!(xlsx.exists());

        let bundle = writer.zip_ttum().unwrap();
        assert!(bundle.exists());
        let bytes = std::fs::read(bundle).unwrap();
        // zip local-file signature
        assert_eq!(&bytes[..4], b"PK\x03\x04");
    }

    #[test]
    fn test_zip_reports_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let writer = ReportWriter::new(&store, "RUN_20250110_100000");
        writer.write_all(&sample_output(), as_of()).unwrap();

        let bundle = writer.zip_reports().unwrap();
        assert!(bundle.exists());
    }
}
