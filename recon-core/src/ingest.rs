//! Upload validation and ingestion.
//!
//! Each file is validated in isolation and the whole upload fails atomically
//! on the first rejection: the caller gets one structured rejection per
//! offending file so the uploader can fix and retry.

use crate::config::ReconConfig;
use crate::normalize::{self, NormalizedFile, RawTable};
use crate::types::{Direction, FileSlot, Source};
use serde::{Deserialize, Serialize};

/// XLSX files are zip archives and start with the zip local-file signature
const XLSX_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// One uploaded file, slot plus raw bytes
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub slot: FileSlot,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Structured rejection for a single invalid file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRejection {
    pub filename: String,
    pub error: String,
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
}

impl FileRejection {
    fn new(filename: &str, error: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            error: error.into(),
            suggestion: suggestion.into(),
            missing_columns: Vec::new(),
        }
    }
}

/// Outcome of ingesting a full upload
#[derive(Debug)]
pub struct IngestOutcome {
    pub files: Vec<IngestedFile>,
    /// Whether the UPI matching path applies to this upload
    pub upi_detected: bool,
    /// Total empty-RRN rows across all files
    pub empty_rrn_rows: usize,
}

/// One validated, normalized file
#[derive(Debug)]
pub struct IngestedFile {
    pub slot: FileSlot,
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: u64,
    pub normalized: NormalizedFile,
}

fn is_xlsx_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".xlsx") || lower.ends_with(".xls")
}

/// Standardized on-disk name for a slot's upload
pub fn stored_name(slot: FileSlot, original: &str) -> String {
    let ext = if is_xlsx_name(original) { "xlsx" } else { "csv" };
    format!("{}.{}", slot.as_str(), ext)
}

/// Validate and parse one file; returns the raw table or a rejection
fn validate_file(file: &UploadFile, max_bytes: u64) -> Result<RawTable, FileRejection> {
    if file.bytes.is_empty() {
        return Err(FileRejection::new(
            &file.filename,
            "File is empty",
            "Upload a file containing at least a header row and one record",
        ));
    }

    if file.bytes.len() as u64 > max_bytes {
        return Err(FileRejection::new(
            &file.filename,
            format!(
                "File is {} bytes, exceeding the {} byte limit",
                file.bytes.len(),
                max_bytes
            ),
            "Split the file per cycle or per direction and upload the parts",
        ));
    }

    let table = if is_xlsx_name(&file.filename) {
        if !file.bytes.starts_with(&XLSX_SIGNATURE) {
            return Err(FileRejection::new(
                &file.filename,
                "File has a spreadsheet extension but is not a valid XLSX archive",
                "Re-export the file from the source system as .xlsx or rename it to .csv",
            ));
        }
        normalize::parse_xlsx(&file.bytes)
    } else {
        normalize::parse_csv(&file.bytes)
    };

    let table = table.map_err(|e| {
        FileRejection::new(
            &file.filename,
            e.to_string(),
            "Verify the file is well-formed and re-upload",
        )
    })?;

    // Any unmappable required column fails the file; silently defaulted
    // amounts or dates must never reach the matching engine
    let map = normalize::map_columns(&table.headers);
    let missing = map.missing_identity_columns();
    if !missing.is_empty() {
        let mut rejection = FileRejection::new(
            &file.filename,
            format!("No candidate column found for: {}", missing.join(", ")),
            "Rename the identifying columns to RRN / Amount / Tran_Date or a known alias",
        );
        rejection.missing_columns = missing.iter().map(|c| c.to_string()).collect();
        return Err(rejection);
    }

    Ok(table)
}

/// Validate and normalize a full upload.
///
/// Per-file failures are collected and returned together; any rejection
/// fails the whole upload (the caller removes already-written files via the
/// ingestion rollback path).
pub fn ingest(
    files: &[UploadFile],
    cycle: Option<&str>,
    config: &ReconConfig,
) -> Result<IngestOutcome, Vec<FileRejection>> {
    let mut rejections = Vec::new();
    let mut ingested = Vec::new();
    let mut upi_detected = false;
    let mut empty_rrn_rows = 0usize;
    let mut seq_base = 0usize;

    for file in files {
        let table = match validate_file(file, config.max_upload_bytes) {
            Ok(table) => table,
            Err(rejection) => {
                tracing::warn!(
                    filename = %rejection.filename,
                    error = %rejection.error,
                    "upload rejected"
                );
                rejections.push(rejection);
                continue;
            }
        };

        // Slot wins over filename tokens; the filename refines direction
        let source = Source::from_filename(&file.filename).unwrap_or_else(|| file.slot.source());
        let direction = Direction::from_filename(&file.filename).or_else(|| file.slot.direction());

        let normalized = normalize::normalize_table(&table, source, direction, cycle, seq_base);
        seq_base += normalized.records.len();
        upi_detected |= normalized.upi_format;
        empty_rrn_rows += normalized.empty_rrn_rows;

        ingested.push(IngestedFile {
            slot: file.slot,
            original_name: file.filename.clone(),
            stored_name: stored_name(file.slot, &file.filename),
            size_bytes: file.bytes.len() as u64,
            normalized,
        });
    }

    if !rejections.is_empty() {
        return Err(rejections);
    }

    tracing::info!(
        files = ingested.len(),
        upi_detected,
        empty_rrn_rows,
        "ingestion complete"
    );

    Ok(IngestOutcome {
        files: ingested,
        upi_detected,
        empty_rrn_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(slot: FileSlot, name: &str, bytes: &[u8]) -> UploadFile {
        UploadFile {
            slot,
            filename: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    const CBS_CSV: &[u8] =
        b"RRN,Amount,Tran_Date,Dr_Cr,RC,Tran_Type\n100000000001,1000.00,2025-01-10,C,00,U2\n";

    #[test]
    fn test_valid_upload() {
        let config = ReconConfig::default();
        let files = vec![upload(FileSlot::CbsInward, "cbs_inward.csv", CBS_CSV)];
        let outcome = ingest(&files, Some("1C"), &config).unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.upi_detected);
        let file = &outcome.files[0];
        assert_eq!(file.normalized.source, Source::Cbs);
        assert_eq!(file.normalized.direction, Some(Direction::Inward));
        assert_eq!(file.stored_name, "cbs_inward.csv");
    }

    #[test]
    fn test_empty_file_rejected() {
        let config = ReconConfig::default();
        let files = vec![upload(FileSlot::Switch, "switch.csv", b"")];
        let rejections = ingest(&files, None, &config).unwrap_err();
        assert_eq!(rejections.len(), 1);
        assert!(rejections[0].error.contains("empty"));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let mut config = ReconConfig::default();
        config.max_upload_bytes = 16;
        let files = vec![upload(FileSlot::Switch, "switch.csv", CBS_CSV)];
        let rejections = ingest(&files, None, &config).unwrap_err();
        assert!(rejections[0].error.contains("exceeding"));
    }

    #[test]
    fn test_bad_xlsx_signature_rejected() {
        let config = ReconConfig::default();
        let files = vec![upload(FileSlot::Ntsl, "ntsl.xlsx", b"this is not a zip archive")];
        let rejections = ingest(&files, None, &config).unwrap_err();
        assert!(rejections[0].error.contains("XLSX"));
    }

    #[test]
    fn test_unmappable_columns_rejected_with_names() {
        let config = ReconConfig::default();
        let files = vec![upload(
            FileSlot::Switch,
            "switch.csv",
            b"alpha,beta\n1,2\n",
        )];
        let rejections = ingest(&files, None, &config).unwrap_err();
        assert_eq!(
            rejections[0].missing_columns,
            vec!["RRN", "Amount", "Tran_Date"]
        );
    }

    #[test]
    fn test_single_missing_required_column_rejected() {
        // A file without an Amount column must not slip through with every
        // amount coerced to zero
        let config = ReconConfig::default();
        let files = vec![upload(
            FileSlot::Switch,
            "switch.csv",
            b"RRN,Tran_Date\n100000000001,2025-01-10\n",
        )];
        let rejections = ingest(&files, None, &config).unwrap_err();
        assert_eq!(rejections[0].missing_columns, vec!["Amount"]);
        assert!(rejections[0].error.contains("Amount"));

        // Likewise for a missing Tran_Date column
        let files = vec![upload(
            FileSlot::Switch,
            "switch.csv",
            b"RRN,Amount\n100000000001,10.00\n",
        )];
        let rejections = ingest(&files, None, &config).unwrap_err();
        assert_eq!(rejections[0].missing_columns, vec!["Tran_Date"]);
    }

    #[test]
    fn test_one_bad_file_fails_whole_upload() {
        let config = ReconConfig::default();
        let files = vec![
            upload(FileSlot::CbsInward, "cbs_inward.csv", CBS_CSV),
            upload(FileSlot::Switch, "switch.csv", b""),
        ];
        let rejections = ingest(&files, None, &config).unwrap_err();
        // Only the invalid file is reported, but the valid one is not returned
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].filename, "switch.csv");
    }

    #[test]
    fn test_sequence_numbers_are_contiguous_across_files() {
        let config = ReconConfig::default();
        let files = vec![
            upload(FileSlot::CbsInward, "cbs_inward.csv", CBS_CSV),
            upload(FileSlot::Switch, "switch.csv", CBS_CSV),
        ];
        let outcome = ingest(&files, None, &config).unwrap();
        assert_eq!(outcome.files[0].normalized.records[0].seq, 0);
        assert_eq!(outcome.files[1].normalized.records[0].seq, 1);
    }
}
