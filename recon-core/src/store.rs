//! File-backed run store.
//!
//! Every run lives under `<root>/<run_id>/` with cycle-scoped input
//! directories and well-known output artifacts. All writes go through
//! write-temp-then-rename so a reader never observes a half-written file;
//! reads tolerate absence and return `None`.

use crate::error::{Error, Result};
use crate::types::Direction;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const RUN_PREFIX: &str = "RUN_";
const TMP_SUFFIX: &str = ".tmp";

/// File-backed store for run artifacts
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run identifiers sort lexicographically, so "latest" is the maximum
    pub fn generate_run_id(now: DateTime<Utc>) -> String {
        format!("{}{}", RUN_PREFIX, now.format("%Y%m%d_%H%M%S"))
    }

    // ------------------------------------------------------------------
    // Path layout
    // ------------------------------------------------------------------

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn run_exists(&self, run_id: &str) -> bool {
        self.run_dir(run_id).is_dir()
    }

    /// Input directory: `<run>/cycle_<id>/<direction>/`
    pub fn input_dir(&self, run_id: &str, cycle: &str, direction: Option<Direction>) -> PathBuf {
        let cycle_dir = self.run_dir(run_id).join(format!("cycle_{}", cycle));
        match direction {
            Some(d) => cycle_dir.join(d.as_str()),
            None => cycle_dir,
        }
    }

    pub fn reports_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("reports")
    }

    pub fn ttum_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("ttum")
    }

    pub fn metadata_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("metadata.json")
    }

    pub fn recon_output_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("recon_output.json")
    }

    pub fn summary_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("summary.json")
    }

    pub fn hanging_state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("hanging_state.json")
    }

    pub fn accounting_output_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("accounting_output.json")
    }

    pub fn download_meta_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("download_meta.json")
    }

    /// Proposals live beside the run directory so whole-run deletion keeps
    /// the maker–checker history
    pub fn proposals_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{}_proposals.json", run_id))
    }

    pub fn rollback_history_path(&self) -> PathBuf {
        self.root.join("rollback_history.json")
    }

    // ------------------------------------------------------------------
    // Atomic persistence
    // ------------------------------------------------------------------

    /// Write bytes via `<target>.tmp` + rename
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(path);
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Serialize a value as pretty JSON and write atomically
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &bytes)
    }

    /// Read JSON, returning `None` when the file does not exist
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Copy a file to a timestamped backup next to it
    pub fn backup_file(&self, path: &Path, label: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Cannot back up missing file: {}",
                path.display()
            )));
        }
        let stamp = now.format("%Y%m%d_%H%M%S");
        let backup = path.with_file_name(format!("{}_backup_{}.json", label, stamp));
        fs::copy(path, &backup)?;
        tracing::info!(backup = %backup.display(), "backup created");
        Ok(backup)
    }

    // ------------------------------------------------------------------
    // Run enumeration
    // ------------------------------------------------------------------

    /// All run ids in lexicographic (chronological) order
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(RUN_PREFIX) {
                runs.push(name);
            }
        }
        runs.sort();
        Ok(runs)
    }

    pub fn latest_run(&self) -> Result<Option<String>> {
        Ok(self.list_runs()?.into_iter().last())
    }

    /// Chronologically next run after `run_id`, if any
    pub fn next_run(&self, run_id: &str) -> Result<Option<String>> {
        let runs = self.list_runs()?;
        let idx = match runs.iter().position(|r| r == run_id) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        Ok(runs.get(idx + 1).cloned())
    }

    /// Up to `n` runs immediately preceding `run_id`, most recent first
    pub fn previous_runs(&self, run_id: &str, n: usize) -> Result<Vec<String>> {
        let runs = self.list_runs()?;
        let idx = match runs.iter().position(|r| r == run_id) {
            Some(idx) => idx,
            None => return Ok(Vec::new()),
        };
        Ok(runs[..idx].iter().rev().take(n).cloned().collect())
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    /// Persist one uploaded file under the cycle/direction hierarchy
    pub fn save_upload(
        &self,
        run_id: &str,
        cycle: &str,
        direction: Option<Direction>,
        stored_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.input_dir(run_id, cycle, direction).join(stored_name);
        self.write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Remove one uploaded file (ingestion rollback)
    pub fn remove_upload(&self, run_id: &str, stored_name: &str) -> Result<bool> {
        for path in self.list_uploads(run_id)? {
            if path.file_name().and_then(|n| n.to_str()) == Some(stored_name) {
                fs::remove_file(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All uploaded data files for a run
    pub fn list_uploads(&self, run_id: &str) -> Result<Vec<PathBuf>> {
        let run_dir = self.run_dir(run_id);
        if !run_dir.exists() {
            return Err(Error::NotFound(format!("Run {} not found", run_id)));
        }
        let mut files = Vec::new();
        collect_data_files(&run_dir, &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Delete an entire run directory, normalizing read-only bits first
    pub fn delete_run(&self, run_id: &str) -> Result<()> {
        let run_dir = self.run_dir(run_id);
        if !run_dir.exists() {
            return Err(Error::NotFound(format!("Run {} not found", run_id)));
        }
        make_writable(&run_dir)?;
        fs::remove_dir_all(&run_dir)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Recursively collect CSV/XLSX files below `dir`, skipping `.tmp` sidecars
fn collect_data_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            // Output directories hold reports, not uploads
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "reports" || name == "ttum" {
                continue;
            }
            collect_data_files(&path, out)?;
        } else {
            let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase());
            if let Some(name) = name {
                if name.ends_with(TMP_SUFFIX) {
                    continue;
                }
                if name.ends_with(".csv") || name.ends_with(".xlsx") || name.ends_with(".xls") {
                    out.push(path);
                }
            }
        }
    }
    Ok(())
}

/// Clear read-only bits below `dir` so deletion succeeds on every platform
fn make_writable(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let mut perms = entry.metadata()?.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(&path, perms);
        }
        if entry.file_type()?.is_dir() {
            make_writable(&path)?;
        }
    }
    Ok(())
}
