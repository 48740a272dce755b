//! File normalization: parse heterogeneous tabular files into canonical
//! transaction records.
//!
//! Column mapping runs two strategies per canonical column: case-insensitive
//! exact match against the alias list, then substring containment in either
//! direction. Unmapped optional columns become empty; a file where none of
//! RRN, Amount and Tran_Date can be identified is rejected upstream.

use crate::error::{Error, Result};
use crate::types::{Direction, DrCr, Source, TxnRecord};
use calamine::{Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::io::Cursor;
use std::str::FromStr;

/// Canonical columns the normalizer knows how to map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalColumn {
    Rrn,
    Amount,
    TranDate,
    DrCr,
    Rc,
    TranType,
    UpiTranId,
}

impl CanonicalColumn {
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalColumn::Rrn => "RRN",
            CanonicalColumn::Amount => "Amount",
            CanonicalColumn::TranDate => "Tran_Date",
            CanonicalColumn::DrCr => "Dr_Cr",
            CanonicalColumn::Rc => "RC",
            CanonicalColumn::TranType => "Tran_Type",
            CanonicalColumn::UpiTranId => "UPI_Tran_ID",
        }
    }

    /// Ordered alias list, strongest first
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalColumn::Rrn => &[
                "rrn",
                "reference number",
                "ref number",
                "reference",
                "ref",
                "retrieval reference number",
                "reference_no",
                "ref_no",
                "unique id",
                "unique_id",
            ],
            CanonicalColumn::Amount => &[
                "amount",
                "amt",
                "tran amount",
                "transaction amount",
                "tran_amt",
                "transaction_amt",
                "amount_inr",
                "tran_value",
                "transaction_value",
                "principal_amount",
                "value",
            ],
            CanonicalColumn::TranDate => &[
                "tran_date",
                "tran date",
                "transaction date",
                "transaction_date",
                "trn date",
                "trn_date",
                "trans_date",
                "transaction_dt",
                "date_time",
                "datetime",
                "tran_datetime",
                "date",
                "dt",
            ],
            CanonicalColumn::DrCr => &[
                "dr_cr",
                "d/c",
                "dr/cr",
                "debit_credit",
                "debit/credit",
                "credit_debit",
                "c/d",
                "cd",
            ],
            CanonicalColumn::Rc => &[
                "rc",
                "rcode",
                "response code",
                "response_code",
                "status_code",
                "response",
                "error_code",
            ],
            CanonicalColumn::TranType => &[
                "tran_type",
                "tran type",
                "transaction type",
                "transaction_type",
                "payment type",
                "payment_type",
                "transaction_mode",
                "payment_mode",
                "service_type",
                "type",
                "mode",
            ],
            CanonicalColumn::UpiTranId => &[
                "upi_tran_id",
                "upi tran id",
                "upi_txn_id",
                "upi txn id",
                "upi transaction id",
                "upi_transaction_id",
                "upi_id",
                "upi id",
            ],
        }
    }
}

/// Header columns whose mere presence marks a file as UPI-format
const UPI_MARKER_COLUMNS: [&str; 4] = [
    "upi_tran_id",
    "payer_psp",
    "payee_psp",
    "originating_channel",
];

/// Parsed-but-untyped table
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Resolved header indices per canonical column
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    pub rrn: Option<usize>,
    pub amount: Option<usize>,
    pub tran_date: Option<usize>,
    pub dr_cr: Option<usize>,
    pub rc: Option<usize>,
    pub tran_type: Option<usize>,
    pub upi_tran_id: Option<usize>,
}

impl ColumnMap {
    /// Canonical identity columns that could not be mapped
    pub fn missing_identity_columns(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.rrn.is_none() {
            missing.push(CanonicalColumn::Rrn.name());
        }
        if self.amount.is_none() {
            missing.push(CanonicalColumn::Amount.name());
        }
        if self.tran_date.is_none() {
            missing.push(CanonicalColumn::TranDate.name());
        }
        missing
    }
}

/// Result of normalizing a single file
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub source: Source,
    pub direction: Option<Direction>,
    pub records: Vec<TxnRecord>,
    /// Rows with an empty RRN; retained for settlement-entry detection but
    /// never classified as an RRN group of their own
    pub empty_rrn_rows: usize,
    pub upi_format: bool,
}

/// Parse CSV bytes into a raw table
pub fn parse_csv(bytes: &[u8]) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

/// Parse XLSX bytes into a raw table (first sheet, first row as header)
pub fn parse_xlsx(bytes: &[u8]) -> Result<RawTable> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| Error::Validation(format!("XLSX parse failed: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Validation("XLSX workbook has no sheets".to_string()))?
        .map_err(|e| Error::Validation(format!("XLSX sheet read failed: {}", e)))?;

    let mut iter = range.rows();
    let headers = match iter.next() {
        Some(row) => row.iter().map(cell_to_string).collect::<Vec<_>>(),
        None => return Ok(RawTable::default()),
    };

    let rows = iter
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>())
        .collect();

    Ok(RawTable { headers, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            // Identifier columns come back as floats; keep them integral
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

/// Excel stores datetimes as days since 1899-12-30
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let secs = (serial.fract() * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(secs))
}

/// Resolve a canonical column against the actual headers
fn find_column(headers: &[String], column: CanonicalColumn) -> Option<usize> {
    let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

    // Exact match against the alias list
    for alias in column.aliases() {
        if let Some(idx) = lowered.iter().position(|h| h == alias) {
            return Some(idx);
        }
    }

    // Substring containment in either direction
    for alias in column.aliases() {
        if let Some(idx) = lowered
            .iter()
            .position(|h| !h.is_empty() && (h.contains(alias) || alias.contains(h.as_str())))
        {
            return Some(idx);
        }
    }

    None
}

/// Map all canonical columns for a header row
pub fn map_columns(headers: &[String]) -> ColumnMap {
    ColumnMap {
        rrn: find_column(headers, CanonicalColumn::Rrn),
        amount: find_column(headers, CanonicalColumn::Amount),
        tran_date: find_column(headers, CanonicalColumn::TranDate),
        dr_cr: find_column(headers, CanonicalColumn::DrCr),
        rc: find_column(headers, CanonicalColumn::Rc),
        tran_type: find_column(headers, CanonicalColumn::TranType),
        upi_tran_id: find_column(headers, CanonicalColumn::UpiTranId),
    }
}

/// Whether the header row carries any UPI marker column
pub fn has_upi_marker_columns(headers: &[String]) -> bool {
    headers.iter().any(|h| {
        let lower = h.trim().to_lowercase().replace([' ', '-'], "_");
        UPI_MARKER_COLUMNS.iter().any(|m| lower.contains(m))
    })
}

/// Coerce an amount cell. Unparseable values become zero.
pub fn parse_amount(raw: &str) -> Decimal {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | ' '))
        .collect();
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(&cleaned).unwrap_or(Decimal::ZERO)
}

const EPOCH_DATE: &str = "1970-01-01";

/// Coerce a date cell. Missing or unparseable dates become the epoch.
pub fn parse_date(raw: &str) -> NaiveDateTime {
    let trimmed = raw.trim();
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .expect("epoch date")
        .and_hms_opt(0, 0, 0)
        .expect("epoch time");

    if trimmed.is_empty() {
        return epoch;
    }

    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return dt;
        }
    }

    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y%m%d"];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return d.and_hms_opt(0, 0, 0).expect("midnight");
        }
    }

    // Excel serial dates survive CSV round-trips as plain numbers
    if let Ok(serial) = trimmed.parse::<f64>() {
        if serial > 20_000.0 && serial < 80_000.0 {
            if let Some(dt) = excel_serial_to_datetime(serial) {
                return dt;
            }
        }
    }

    epoch
}

/// Normalize one parsed table into canonical records.
///
/// Empty-RRN rows are retained (settlement entries legitimately lack an
/// RRN) but counted so ingestion can surface the warning; they never form
/// an RRN group of their own.
pub fn normalize_table(
    table: &RawTable,
    source: Source,
    direction: Option<Direction>,
    cycle: Option<&str>,
    seq_base: usize,
) -> NormalizedFile {
    let map = map_columns(&table.headers);
    let upi_format = has_upi_marker_columns(&table.headers);

    let get = |row: &[String], idx: Option<usize>| -> String {
        idx.and_then(|i| row.get(i))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let mut records = Vec::with_capacity(table.rows.len());
    let mut empty_rrn_rows = 0usize;
    let mut upi_by_type = false;

    for (offset, row) in table.rows.iter().enumerate() {
        let rrn = get(row, map.rrn);
        if rrn.is_empty() {
            empty_rrn_rows += 1;
        }

        let upi_tran_id = {
            let v = get(row, map.upi_tran_id);
            if v.is_empty() { None } else { Some(v) }
        };

        let tran_type = get(row, map.tran_type);
        if matches!(tran_type.to_uppercase().as_str(), "U2" | "U3") {
            upi_by_type = true;
        }

        records.push(TxnRecord {
            rrn,
            upi_tran_id,
            amount: parse_amount(&get(row, map.amount)),
            tran_date: parse_date(&get(row, map.tran_date)),
            dr_cr: DrCr::parse(&get(row, map.dr_cr)),
            rc: get(row, map.rc),
            tran_type,
            source,
            direction,
            cycle: cycle.map(|c| c.to_string()),
            seq: seq_base + offset,
        });
    }

    if empty_rrn_rows > 0 {
        tracing::warn!(
            source = source.as_str(),
            empty_rrn_rows,
            "normalization retained rows without an RRN"
        );
    }

    NormalizedFile {
        source,
        direction,
        records,
        empty_rrn_rows,
        upi_format: upi_format || upi_by_type,
    }
}

/// Epoch sentinel used where a source row had no usable date
pub fn epoch_datetime() -> NaiveDateTime {
    parse_date(EPOCH_DATE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    const SAMPLE_CSV: &[u8] = b"Reference Number,Tran Amount,Transaction Date,D/C,Response Code,Type\n\
        100000000001,1000.00,2025-01-10 10:15:00,C,00,U2\n\
        100000000002,\"2,500.50\",2025-01-10,D,00,U2\n\
        ,99.00,2025-01-11,C,00,U2\n";

    #[test]
    fn test_csv_column_mapping_and_coercion() {
        let table = parse_csv(SAMPLE_CSV).unwrap();
        let file = normalize_table(&table, Source::Cbs, Some(Direction::Inward), Some("1C"), 0);

        assert_eq!(file.records.len(), 3);
        assert_eq!(file.empty_rrn_rows, 1);

        let first = &file.records[0];
        assert_eq!(first.rrn, "100000000001");
        assert_eq!(first.amount, dec!(1000.00));
        assert_eq!(first.dr_cr, Some(DrCr::Credit));
        assert_eq!(first.rc, "00");
        assert_eq!(first.tran_date.format("%H:%M").to_string(), "10:15");

        // thousands separator stripped
        assert_eq!(file.records[1].amount, dec!(2500.50));
        // U2 transaction type flags the UPI path even without marker columns
        assert!(file.upi_format);
    }

    #[test]
    fn test_unmapped_identity_columns_reported() {
        let headers = vec!["foo".to_string(), "bar".to_string()];
        let map = map_columns(&headers);
        assert_eq!(map.missing_identity_columns(), vec!["RRN", "Amount", "Tran_Date"]);
    }

    #[test]
    fn test_upi_marker_columns() {
        let headers = vec!["RRN".to_string(), "Payer PSP".to_string()];
        assert!(has_upi_marker_columns(&headers));
        let headers = vec!["RRN".to_string(), "Amount".to_string()];
        assert!(!has_upi_marker_columns(&headers));
    }

    #[test]
    fn test_amount_coercion_fallback() {
        assert_eq!(parse_amount("not-a-number"), Decimal::ZERO);
        assert_eq!(parse_amount(""), Decimal::ZERO);
        assert_eq!(parse_amount(" 1,000.25 "), dec!(1000.25));
    }

    #[test]
    fn test_date_coercion_fallback() {
        let epoch = epoch_datetime();
        assert_eq!(parse_date("garbage"), epoch);
        assert_eq!(parse_date(""), epoch);
        assert_eq!(
            parse_date("2025-01-10").format("%Y-%m-%d").to_string(),
            "2025-01-10"
        );
        assert_eq!(
            parse_date("10/01/2025 22:45:00").format("%Y-%m-%d %H:%M").to_string(),
            "2025-01-10 22:45"
        );
    }

    #[test]
    fn test_excel_serial_dates() {
        // 2025-01-10 is serial 45667
        let dt = excel_serial_to_datetime(45667.0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2025-01-10");
        assert!(excel_serial_to_datetime(-1.0).is_none());
    }

    #[test]
    fn test_normalization_idempotent() {
        let table = parse_csv(SAMPLE_CSV).unwrap();
        let once = normalize_table(&table, Source::Cbs, None, None, 0);

        // Re-render the normalized records as a canonical CSV and run the
        // normalizer again; nothing may change.
        let mut out = String::from("RRN,Amount,Tran_Date,Dr_Cr,RC,Tran_Type\n");
        for r in &once.records {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                r.rrn,
                r.amount,
                r.tran_date.format("%Y-%m-%dT%H:%M:%S"),
                r.dr_cr.map(|d| d.as_str()).unwrap_or(""),
                r.rc,
                r.tran_type
            ));
        }
        let table2 = parse_csv(out.as_bytes()).unwrap();
        let twice = normalize_table(&table2, Source::Cbs, None, None, 0);

        assert_eq!(once.records.len(), twice.records.len());
        for (a, b) in once.records.iter().zip(twice.records.iter()) {
            assert_eq!(a.rrn, b.rrn);
            assert_eq!(a.amount, b.amount);
            assert_eq!(a.tran_date, b.tran_date);
            assert_eq!(a.dr_cr, b.dr_cr);
            assert_eq!(a.rc, b.rc);
        }
    }

    proptest! {
        #[test]
        fn prop_parse_amount_never_panics(s in ".{0,32}") {
            let _ = parse_amount(&s);
        }

        #[test]
        fn prop_parse_date_never_panics(s in ".{0,32}") {
            let _ = parse_date(&s);
        }

        #[test]
        fn prop_amount_roundtrip(cents in 0i64..10_000_000_00) {
            let amount = Decimal::new(cents, 2);
            prop_assert_eq!(parse_amount(&amount.to_string()), amount);
        }
    }
}
