//! Append-only audit trail.
//!
//! Structured events over the lifecycle of each run, persisted as one JSON
//! line per event with a SHA-256 hash chain for tamper detection. Supports
//! filtering by run, user, date range and level, plus summary and
//! compliance aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Audit log errors
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Audit action categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserAction,
    Upload,
    ReconEvent,
    Rollback,
    ForceMatch,
    GlOp,
    Download,
    Exception,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserAction => "USER_ACTION",
            AuditAction::Upload => "UPLOAD",
            AuditAction::ReconEvent => "RECON_EVENT",
            AuditAction::Rollback => "ROLLBACK",
            AuditAction::ForceMatch => "FORCE_MATCH",
            AuditAction::GlOp => "GL_OP",
            AuditAction::Download => "DOWNLOAD",
            AuditAction::Exception => "EXCEPTION",
        }
    }
}

/// Audit severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
            AuditLevel::Critical => "CRITICAL",
        }
    }
}

/// One audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_id: Uuid,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub user_id: String,
    pub level: AuditLevel,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    #[serde(default)]
    pub previous_hash: String,
    #[serde(default)]
    pub hash: String,
}

impl AuditEvent {
    pub fn new(action: AuditAction, level: AuditLevel, user_id: impl Into<String>) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            action,
            run_id: None,
            user_id: user_id.into(),
            level,
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
            previous_hash: String::new(),
            hash: String::new(),
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.audit_id.as_bytes());
        hasher.update(self.action.as_str().as_bytes());
        if let Some(run_id) = &self.run_id {
            hasher.update(run_id.as_bytes());
        }
        hasher.update(self.user_id.as_bytes());
        hasher.update(self.level.as_str().as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.details.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hex_encode(&hasher.finalize())
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Query filter for the trail
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub run_id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_level: Option<AuditLevel>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(run_id) = &self.run_id {
            if event.run_id.as_deref() != Some(run_id.as_str()) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if &event.user_id != user_id {
                return false;
            }
        }
        if let Some(action) = self.action {
            if event.action != action {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        if let Some(min_level) = self.min_level {
            if event.level < min_level {
                return false;
            }
        }
        true
    }
}

/// Aggregated view of the trail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_events: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
}

/// Compliance view: per-run activity plus chain integrity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub total_events: usize,
    pub chain_intact: bool,
    pub runs_touched: BTreeMap<String, usize>,
    pub rollbacks: usize,
    pub force_matches: usize,
    pub errors: usize,
}

/// Append-only audit trail over a JSONL file
pub struct AuditTrail {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    last_hash: Arc<Mutex<String>>,
}

impl AuditTrail {
    /// Open (creating if needed) the trail at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let last_hash = Self::read_last_hash(&path)?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            last_hash: Arc::new(Mutex::new(last_hash)),
        })
    }

    fn read_last_hash(path: &Path) -> Result<String> {
        if !path.exists() {
            return Ok(String::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let last_line = reader.lines().last();
        match last_line {
            Some(Ok(line)) if !line.trim().is_empty() => {
                let event: AuditEvent = serde_json::from_str(&line)
                    .map_err(|e| AuditError::Serialization(e.to_string()))?;
                Ok(event.hash)
            }
            _ => Ok(String::new()),
        }
    }

    /// Append one event; the hash chain links it to its predecessor
    pub async fn log(&self, mut event: AuditEvent) -> Result<()> {
        let mut last_hash = self.last_hash.lock().await;
        event.previous_hash = last_hash.clone();
        event.hash = event.compute_hash();

        let mut json = serde_json::to_string(&event)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        json.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(json.as_bytes())?;
        file.flush()?;

        *last_hash = event.hash.clone();
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Events matching the filter, in append order
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let _guard = self.file.lock().await;
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect())
    }

    /// Aggregate counts over the filtered trail
    pub async fn summary(&self, filter: &AuditFilter) -> Result<AuditSummary> {
        let events = self.query(filter).await?;
        let mut summary = AuditSummary {
            total_events: events.len(),
            ..Default::default()
        };
        for event in &events {
            *summary
                .by_action
                .entry(event.action.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_level
                .entry(event.level.as_str().to_string())
                .or_default() += 1;
            *summary.by_user.entry(event.user_id.clone()).or_default() += 1;
        }
        Ok(summary)
    }

    /// Verify the hash chain end to end
    pub async fn verify_integrity(&self) -> Result<bool> {
        let _guard = self.file.lock().await;
        let events = self.read_all()?;
        let mut previous_hash = String::new();
        for (i, event) in events.iter().enumerate() {
            if !event.verify_hash() {
                return Err(AuditError::IntegrityFailure(format!(
                    "Event hash mismatch at line {}",
                    i + 1
                )));
            }
            if event.previous_hash != previous_hash {
                return Err(AuditError::IntegrityFailure(format!(
                    "Hash chain broken at line {}",
                    i + 1
                )));
            }
            previous_hash = event.hash.clone();
        }
        Ok(true)
    }

    /// Compliance view over the whole trail
    pub async fn compliance_report(&self, run_id: Option<&str>) -> Result<ComplianceReport> {
        let chain_intact = self.verify_integrity().await.is_ok();
        let filter = AuditFilter {
            run_id: run_id.map(|r| r.to_string()),
            ..Default::default()
        };
        let events = self.query(&filter).await?;

        let mut runs_touched: BTreeMap<String, usize> = BTreeMap::new();
        let mut rollbacks = 0usize;
        let mut force_matches = 0usize;
        let mut errors = 0usize;

        for event in &events {
            if let Some(run) = &event.run_id {
                *runs_touched.entry(run.clone()).or_default() += 1;
            }
            match event.action {
                AuditAction::Rollback => rollbacks += 1,
                AuditAction::ForceMatch => force_matches += 1,
                _ => {}
            }
            if event.level >= AuditLevel::Error {
                errors += 1;
            }
        }

        Ok(ComplianceReport {
            generated_at: Utc::now(),
            total_events: events.len(),
            chain_intact,
            runs_touched,
            rollbacks,
            force_matches,
            errors,
        })
    }
}
