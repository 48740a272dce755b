//! Configuration for the reconciliation rail

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    /// Service name
    pub service_name: String,

    /// Root directory for run data
    pub data_dir: PathBuf,

    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: u64,

    /// Rate limit window in seconds
    pub rate_limit_window_secs: u64,

    /// Maximum requests per window per client
    pub rate_limit_max: u32,

    /// Amount comparison tolerance
    pub amount_tolerance: Decimal,

    /// Date tolerance for exact matching (days)
    pub date_tolerance_days: i64,

    /// Date tolerance for partial matching (days)
    pub partial_match_date_tolerance_days: i64,

    /// Cycles an RRN must stay hanging before it is final
    pub hanging_wait_cycles: usize,

    /// NPCI cycle cut-off time of day
    pub cut_off_time: NaiveTime,

    /// Window before midnight treated as cut-off territory (minutes)
    pub cut_off_window_minutes: i64,

    /// Minimum amount for a no-RRN CBS row to qualify as a settlement entry
    pub settlement_threshold: Decimal,

    /// GL account mapping
    pub gl: GlConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            service_name: "upi-recon".to_string(),
            data_dir: PathBuf::from("./data/runs"),
            max_upload_bytes: 100 * 1024 * 1024,
            rate_limit_window_secs: 60,
            rate_limit_max: 10,
            amount_tolerance: Decimal::new(1, 2), // 0.01
            date_tolerance_days: 1,
            partial_match_date_tolerance_days: 2,
            hanging_wait_cycles: 2,
            cut_off_time: NaiveTime::from_hms_opt(22, 30, 0).expect("valid cut-off time"),
            cut_off_window_minutes: 90,
            settlement_threshold: Decimal::new(1000, 0),
            gl: GlConfig::default(),
        }
    }
}

/// One GL account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlAccount {
    pub code: String,
    pub name: String,
}

impl GlAccount {
    fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

/// GL account mapping used by voucher and TTUM generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlConfig {
    pub cash_account: GlAccount,
    pub bank_account: GlAccount,
    pub suspense_account: GlAccount,
    pub settlement_payable: GlAccount,
    pub settlement_receivable: GlAccount,
    pub npci_settlement: GlAccount,
}

impl Default for GlConfig {
    fn default() -> Self {
        Self {
            cash_account: GlAccount::new("100100", "Cash in Hand"),
            bank_account: GlAccount::new("100200", "Bank Account"),
            suspense_account: GlAccount::new("200100", "Suspense Account"),
            settlement_payable: GlAccount::new("200200", "Settlement Payable"),
            settlement_receivable: GlAccount::new("100300", "Settlement Receivable"),
            npci_settlement: GlAccount::new("200300", "NPCI Settlement Account"),
        }
    }
}

impl ReconConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReconConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = ReconConfig::default();

        if let Ok(dir) = std::env::var("RECON_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(max) = std::env::var("RECON_RATE_LIMIT_MAX") {
            config.rate_limit_max = max
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid RECON_RATE_LIMIT_MAX: {}", max)))?;
        }

        if let Ok(window) = std::env::var("RECON_RATE_LIMIT_WINDOW_SECS") {
            config.rate_limit_window_secs = window.parse().map_err(|_| {
                crate::Error::Config(format!("Invalid RECON_RATE_LIMIT_WINDOW_SECS: {}", window))
            })?;
        }

        if let Ok(cutoff) = std::env::var("RECON_CUT_OFF_TIME") {
            config.cut_off_time = NaiveTime::parse_from_str(&cutoff, "%H:%M")
                .map_err(|_| crate::Error::Config(format!("Invalid RECON_CUT_OFF_TIME: {}", cutoff)))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(crate::Error::Config("max_upload_bytes must be positive".into()));
        }
        if self.rate_limit_max == 0 {
            return Err(crate::Error::Config("rate_limit_max must be positive".into()));
        }
        if self.amount_tolerance < Decimal::ZERO {
            return Err(crate::Error::Config("amount_tolerance must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconConfig::default();
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.rate_limit_max, 10);
        assert_eq!(config.rate_limit_window_secs, 60);
        assert_eq!(config.amount_tolerance, Decimal::new(1, 2));
        assert_eq!(config.cut_off_time, NaiveTime::from_hms_opt(22, 30, 0).unwrap());
        assert_eq!(config.hanging_wait_cycles, 2);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = ReconConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: ReconConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.settlement_threshold, config.settlement_threshold);
        assert_eq!(back.gl.bank_account, config.gl.bank_account);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("RECON_CUT_OFF_TIME", "23:00");
        let config = ReconConfig::from_env().unwrap();
        assert_eq!(config.cut_off_time, NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        std::env::remove_var("RECON_CUT_OFF_TIME");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ReconConfig::default();
        config.rate_limit_max = 0;
        assert!(config.validate().is_err());
    }
}
