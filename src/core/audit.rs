//! Audit trail for sync runs
//!
//! An [`AuditTrail`] is started when a run begins, collects one outcome per
//! plan entry as the run proceeds, and is finalized once the run ends,
//! however it ends. The summary is computed from the final entry statuses
//! at that point, never incrementally.
//!
//! [`AuditWriter`] persists the trail as two sibling files in the audit
//! directory (default `~/gh-photos`):
//!
//! - `manifest.json`, overwritten on every run
//! - `manifest_<UTC timestamp>.json`, one per run
//!
//! plus an optional copy at a user-chosen path.

use crate::assets::AssetType;
use crate::backup::DeviceInfo;
use crate::core::error::{PhotosError, Result};
use crate::planner::{EntryStatus, PlanEntry};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Name of the audit file overwritten on every run
pub const LATEST_AUDIT_FILE: &str = "manifest.json";

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Command line that started the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    /// Only flags that differ from their defaults
    pub flags: Vec<String>,
}

/// Host the run executed on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            os_version: sysinfo::System::long_os_version(),
            host_name: sysinfo::System::host_name(),
        }
    }
}

/// Final record of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub asset_id: String,
    pub filename: String,
    pub source_path: PathBuf,
    pub target_path: String,
    pub asset_type: AssetType,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PlanEntry> for AssetOutcome {
    fn from(entry: &PlanEntry) -> Self {
        Self {
            asset_id: entry.asset_id.clone(),
            filename: entry.filename.clone(),
            source_path: entry.source_path.clone(),
            target_path: entry.target_path.clone(),
            asset_type: entry.asset_type,
            file_size: entry.file_size,
            digest: entry.digest.clone(),
            status: entry.status,
            error: entry.error.clone(),
        }
    }
}

/// Totals computed at finalize time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total: usize,
    pub pending: usize,
    pub uploaded: usize,
    pub verified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub missing: usize,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    /// Asset counts per type
    #[serde(default)]
    pub by_type: BTreeMap<String, usize>,
}

/// Durable record of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    /// Start timestamp, also used in the historical file name
    pub run_id: String,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    pub invocation: Invocation,
    pub system: SystemInfo,
    pub summary: AuditSummary,
    pub assets: Vec<AssetOutcome>,
}

impl AuditTrail {
    pub fn new(invocation: Invocation) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string(),
            tool_version: crate::VERSION.to_string(),
            started_at,
            finished_at: None,
            outcome: RunOutcome::Running,
            error: None,
            backup_path: None,
            remote: None,
            device: None,
            invocation,
            system: SystemInfo::current(),
            summary: AuditSummary::default(),
            assets: Vec::new(),
        }
    }

    pub fn set_source(&mut self, backup_path: &Path, device: Option<DeviceInfo>) {
        self.backup_path = Some(backup_path.to_path_buf());
        self.device = device.filter(|d| !d.is_empty());
    }

    pub fn set_remote(&mut self, remote: &str) {
        self.remote = Some(remote.to_string());
    }

    /// Replace the recorded outcomes with the current state of the plan
    pub fn record_entries(&mut self, entries: &[PlanEntry]) {
        self.assets = entries.iter().map(AssetOutcome::from).collect();
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Close the trail and compute the summary from the recorded statuses
    pub fn finalize(&mut self, outcome: RunOutcome, error: Option<String>) {
        let finished_at = Utc::now();
        let mut summary = AuditSummary {
            total: self.assets.len(),
            duration_ms: (finished_at - self.started_at).num_milliseconds().max(0) as u64,
            ..AuditSummary::default()
        };

        for asset in &self.assets {
            match asset.status {
                EntryStatus::Pending => summary.pending += 1,
                EntryStatus::Uploaded => summary.uploaded += 1,
                EntryStatus::Verified => summary.verified += 1,
                EntryStatus::Skipped => summary.skipped += 1,
                EntryStatus::Failed => summary.failed += 1,
                EntryStatus::Missing => summary.missing += 1,
            }
            if matches!(asset.status, EntryStatus::Uploaded | EntryStatus::Verified) {
                summary.bytes_transferred += asset.file_size;
            }
            *summary
                .by_type
                .entry(asset.asset_type.as_str().to_string())
                .or_default() += 1;
        }

        self.summary = summary;
        self.finished_at = Some(finished_at);
        self.outcome = outcome;
        self.error = error;
    }

    /// File name of the historical copy
    pub fn historical_file_name(&self) -> String {
        format!("manifest_{}.json", self.run_id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PhotosError::Io(format!("Failed to open audit file '{}': {}", path.display(), e))
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// `path`, or `<stem>_<n>.<ext>` for the first `n` that is not taken yet
fn unused_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| path.with_file_name(format!("{}_{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

/// Where an audit trail was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPaths {
    pub latest: PathBuf,
    pub historical: PathBuf,
    pub copy: Option<PathBuf>,
}

/// Writes audit trails to the audit directory
#[derive(Debug, Clone)]
pub struct AuditWriter {
    directory: PathBuf,
    copy_to: Option<PathBuf>,
}

impl AuditWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            copy_to: None,
        }
    }

    /// Also write the trail to `path`
    pub fn with_copy(mut self, path: Option<PathBuf>) -> Self {
        self.copy_to = path;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write `manifest.json`, the timestamped sibling and the optional copy
    pub fn write(&self, trail: &AuditTrail) -> Result<AuditPaths> {
        fs::create_dir_all(&self.directory).map_err(|e| {
            PhotosError::AuditWrite(format!(
                "cannot create '{}': {}",
                self.directory.display(),
                e
            ))
        })?;

        let latest = self.directory.join(LATEST_AUDIT_FILE);
        let historical = unused_path(self.directory.join(trail.historical_file_name()));

        write_json(&historical, trail)?;
        write_json(&latest, trail)?;

        let copy = match &self.copy_to {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| {
                        PhotosError::AuditWrite(format!("cannot create '{}': {}", parent.display(), e))
                    })?;
                }
                write_json(path, trail)?;
                Some(path.clone())
            }
            None => None,
        };

        info!("Audit trail written to {}", latest.display());
        debug!("Historical audit: {}", historical.display());

        Ok(AuditPaths {
            latest,
            historical,
            copy,
        })
    }
}

fn write_json(path: &Path, trail: &AuditTrail) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| PhotosError::AuditWrite(format!("cannot create '{}': {}", path.display(), e)))?;
    serde_json::to_writer_pretty(BufWriter::new(file), trail)
        .map_err(|e| PhotosError::AuditWrite(format!("cannot write '{}': {}", path.display(), e)))
}
