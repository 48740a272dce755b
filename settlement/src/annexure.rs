//! Annexure-IV consolidated adjustment CSV.
//!
//! Field constraints per the NPCI schema: `shtdat` is YYYY-MM-DD and
//! defaults to the processing date when missing, `adjsmt` carries two
//! decimals, and `reason` is truncated to five characters.

use crate::error::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const ANNEXURE_HEADERS: [&str; 9] = [
    "Bankadjref",
    "Flag",
    "shtdat",
    "adjsmt",
    "Shser",
    "Shcrd",
    "FileName",
    "reason",
    "specifyother",
];

const REASON_MAX_LEN: usize = 5;

/// One Annexure-IV row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnexureRecord {
    pub bankadjref: String,
    pub flag: String,
    pub shtdat: String,
    pub adjsmt: String,
    pub shser: String,
    pub shcrd: String,
    pub file_name: String,
    pub reason: String,
    pub specifyother: String,
}

impl AnnexureRecord {
    /// Build a normalized row straight from typed values
    pub fn new(
        bankadjref: String,
        flag: &str,
        value_date: Option<NaiveDate>,
        amount: Decimal,
        rrn: &str,
        file_name: &str,
        reason: &str,
        narration: &str,
        today: NaiveDate,
    ) -> Self {
        let shtdat = value_date.unwrap_or(today).format("%Y-%m-%d").to_string();
        let mut reason = reason.to_string();
        reason.truncate(REASON_MAX_LEN);

        Self {
            bankadjref,
            flag: flag.to_string(),
            shtdat,
            adjsmt: format!("{:.2}", amount),
            shser: rrn.to_string(),
            shcrd: format!("NBIN{}", rrn),
            file_name: file_name.to_string(),
            reason,
            specifyother: narration.to_string(),
        }
    }

    fn fields(&self) -> [&str; 9] {
        [
            &self.bankadjref,
            &self.flag,
            &self.shtdat,
            &self.adjsmt,
            &self.shser,
            &self.shcrd,
            &self.file_name,
            &self.reason,
            &self.specifyother,
        ]
    }
}

/// Render records as CSV bytes with the fixed header
pub fn to_csv_bytes(records: &[AnnexureRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ANNEXURE_HEADERS)?;
    for record in records {
        writer.write_record(record.fields())?;
    }
    writer
        .into_inner()
        .map_err(|e| crate::Error::Csv(e.to_string()))
}
