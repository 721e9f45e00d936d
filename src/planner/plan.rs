//! Upload plans
//!
//! The [`Planner`] turns filtered assets into an ordered [`Manifest`] of
//! [`PlanEntry`]s. The plan decides *what* to do with each asset (its
//! action); the upload engine later records *what happened* (its status).

use crate::assets::{Asset, AssetFlags, AssetType};
use crate::core::cancel::CancellationToken;
use crate::core::checksum::sha256_many;
use crate::core::config::SyncOptions;
use crate::core::error::{PhotosError, Result};
use crate::planner::filter::{AssetFilter, FilterStats};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// What the plan intends for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Upload,
    Skip,
    Error,
}

/// Outcome of an entry.
///
/// `Pending` moves to any other state once; the only later moves are
/// `Uploaded -> Verified` and `Uploaded -> Failed` during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Skipped,
    Uploaded,
    Failed,
    Missing,
    Verified,
}

impl EntryStatus {
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        match (self, next) {
            (EntryStatus::Pending, EntryStatus::Pending) => false,
            (EntryStatus::Pending, EntryStatus::Verified) => false,
            (EntryStatus::Pending, _) => true,
            (EntryStatus::Uploaded, EntryStatus::Verified | EntryStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Skipped => "skipped",
            EntryStatus::Uploaded => "uploaded",
            EntryStatus::Failed => "failed",
            EntryStatus::Missing => "missing",
            EntryStatus::Verified => "verified",
        }
    }
}

/// One step of an upload plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub asset_id: String,
    pub source_path: PathBuf,
    /// Remote path relative to the remote base, `/`-separated
    pub target_path: String,
    pub filename: String,
    pub asset_type: AssetType,
    pub creation_date: DateTime<Utc>,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub mime_type: String,
    #[serde(default)]
    pub flags: AssetFlags,
    pub action: PlanAction,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanEntry {
    pub fn from_asset(asset: &Asset, target_path: String) -> Self {
        Self {
            asset_id: asset.id.clone(),
            source_path: asset.source_path.clone(),
            target_path,
            filename: asset.filename.clone(),
            asset_type: asset.asset_type,
            creation_date: asset.creation_date,
            file_size: asset.file_size,
            digest: asset.digest.clone(),
            mime_type: asset.mime_type.clone(),
            flags: asset.flags.clone(),
            action: PlanAction::Upload,
            status: EntryStatus::Pending,
            error: None,
        }
    }

    /// Directory part of the target path (empty for a bare filename)
    pub fn target_dir(&self) -> &str {
        self.target_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("")
    }

    /// Apply a status change if the lifecycle allows it.
    ///
    /// Returns false (and leaves the entry untouched) otherwise.
    pub fn set_status(&mut self, next: EntryStatus, error: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                "Ignoring status change {} -> {} for {}",
                self.status.as_str(),
                next.as_str(),
                self.target_path
            );
            return false;
        }
        self.status = next;
        if error.is_some() {
            self.error = error;
        }
        true
    }
}

/// Plan and outcome counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub total: usize,
    pub to_upload: usize,
    pub to_skip: usize,
    pub errors: usize,
    pub total_bytes: u64,
    pub pending: usize,
    pub uploaded: usize,
    pub verified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub missing: usize,
    /// Bytes of entries that reached `uploaded` or `verified`
    pub bytes_uploaded: u64,
}

impl ManifestSummary {
    pub fn from_entries(entries: &[PlanEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };

        for entry in entries {
            match entry.action {
                PlanAction::Upload => {
                    summary.to_upload += 1;
                    summary.total_bytes += entry.file_size;
                }
                PlanAction::Skip => summary.to_skip += 1,
                PlanAction::Error => summary.errors += 1,
            }

            match entry.status {
                EntryStatus::Pending => summary.pending += 1,
                EntryStatus::Uploaded => summary.uploaded += 1,
                EntryStatus::Verified => summary.verified += 1,
                EntryStatus::Skipped => summary.skipped += 1,
                EntryStatus::Failed => summary.failed += 1,
                EntryStatus::Missing => summary.missing += 1,
            }

            if matches!(entry.status, EntryStatus::Uploaded | EntryStatus::Verified) {
                summary.bytes_uploaded += entry.file_size;
            }
        }

        summary
    }
}

/// The plan for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub backup_path: PathBuf,
    pub remote_spec: String,
    pub config: SyncOptions,
    pub summary: ManifestSummary,
    #[serde(default)]
    pub filter: FilterStats,
    pub entries: Vec<PlanEntry>,
}

impl Manifest {
    /// Recount the summary from entry actions and statuses
    pub fn refresh_summary(&mut self) {
        self.summary = ManifestSummary::from_entries(&self.entries);
    }

    /// Write the manifest as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path).map_err(|e| {
            PhotosError::Io(format!("Failed to create '{}': {}", path.display(), e))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        info!("Manifest saved to {}", path.display());
        Ok(())
    }

    /// Entries the engine should upload, by index
    pub fn upload_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.action == PlanAction::Upload && e.status == EntryStatus::Pending)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Remote listing used to plan already-present files as skipped
pub trait RemoteInventory {
    /// Subset of `targets` (relative to the remote base) already on the remote
    fn existing_paths(&self, targets: &[String], cancel: &CancellationToken) -> Result<HashSet<String>>;
}

/// Builds manifests from assets
pub struct Planner {
    options: SyncOptions,
    filter: AssetFilter,
}

impl Planner {
    pub fn new(options: SyncOptions) -> Result<Self> {
        let filter = AssetFilter::from_options(&options)?;
        Ok(Self { options, filter })
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Filter assets and compute their target paths, without building entries
    pub fn select(&self, assets: Vec<Asset>, cancel: &CancellationToken) -> Result<(Vec<Asset>, FilterStats)> {
        let (mut kept, stats) = self.filter.apply(assets, cancel)?;
        for asset in &mut kept {
            asset.target_path = Some(asset.compute_target_path(self.options.granularity));
        }
        Ok((kept, stats))
    }

    /// Build the plan.
    ///
    /// With skip-existing and remote pre-scan both on, `inventory` is asked
    /// which targets already exist and those entries become `skip`.
    pub fn plan(
        &self,
        assets: Vec<Asset>,
        backup_path: &Path,
        remote_spec: &str,
        inventory: Option<&dyn RemoteInventory>,
        cancel: &CancellationToken,
    ) -> Result<Manifest> {
        let (kept, filter_stats) = self.select(assets, cancel)?;

        let mut entries = Vec::with_capacity(kept.len());
        let mut seen_targets: HashMap<String, usize> = HashMap::new();
        for asset in &kept {
            let target = asset
                .target_path
                .clone()
                .unwrap_or_else(|| asset.compute_target_path(self.options.granularity));
            let mut entry = PlanEntry::from_asset(asset, target);

            if let Some(first) = seen_targets.get(&entry.target_path) {
                let message = format!(
                    "target path already used by asset {}",
                    entries
                        .get(*first)
                        .map(|e: &PlanEntry| e.asset_id.as_str())
                        .unwrap_or("?")
                );
                warn!("{}: {}", entry.target_path, message);
                entry.action = PlanAction::Error;
                entry.set_status(EntryStatus::Failed, Some(message));
            } else {
                seen_targets.insert(entry.target_path.clone(), entries.len());
            }
            entries.push(entry);
        }

        if self.options.checksum {
            let sources: Vec<PathBuf> = entries.iter().map(|e| e.source_path.clone()).collect();
            let digests = sha256_many(&sources, cancel)?;
            for (entry, digest) in entries.iter_mut().zip(digests) {
                entry.digest = digest;
            }
        }

        if self.options.uses_prescan() {
            if let Some(inventory) = inventory {
                let targets: Vec<String> = entries
                    .iter()
                    .filter(|e| e.action == PlanAction::Upload)
                    .map(|e| e.target_path.clone())
                    .collect();
                let existing = inventory.existing_paths(&targets, cancel)?;
                let mut marked = 0;
                for entry in entries.iter_mut() {
                    if entry.action == PlanAction::Upload && existing.contains(&entry.target_path) {
                        entry.action = PlanAction::Skip;
                        marked += 1;
                    }
                }
                info!("Remote pre-scan: {} of {} files already present", marked, targets.len());
            }
        }

        let mut manifest = Manifest {
            generated_at: Utc::now(),
            backup_path: backup_path.to_path_buf(),
            remote_spec: remote_spec.to_string(),
            config: self.options.clone(),
            summary: ManifestSummary::default(),
            filter: filter_stats,
            entries,
        };
        manifest.refresh_summary();
        debug!(
            "Plan: {} entries, {} to upload, {} to skip, {} errors",
            manifest.summary.total,
            manifest.summary.to_upload,
            manifest.summary.to_skip,
            manifest.summary.errors
        );
        Ok(manifest)
    }
}
