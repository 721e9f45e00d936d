//! Upload engine
//!
//! Drives the sync tool over a [`Manifest`]:
//!
//! 1. Entries planned as `skip` are marked skipped, missing sources missing.
//! 2. The remaining upload entries are cut into chunks (one chunk for small
//!    plans, 100 or 200 entries otherwise).
//! 3. Each chunk is grouped by target directory. A group is staged into a
//!    temporary mirror of the remote layout and copied with one sync-tool
//!    call; single-file groups use `copyto`.
//! 4. Optionally, every uploaded entry is checked against the remote.
//!
//! A failing group fails the unfinished entries of its chunk and the run
//! moves on to the next chunk. Cancellation stops between groups and leaves
//! unattempted entries pending.

use crate::core::cancel::CancellationToken;
use crate::core::config::SyncOptions;
use crate::core::error::{PhotosError, Result};
use crate::planner::{EntryStatus, Manifest, PlanAction, PlanEntry, RemoteInventory};
use crate::upload::remote::{build_remote_path, remote_name, remote_root};
use crate::upload::staging::StagingDir;
use crate::upload::sync_tool::{CopyOptions, SyncTool};
use chrono::Utc;
use log::{debug, info, log_enabled, warn, Level};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

/// Plans with more target directories than this are pre-scanned with one
/// recursive listing instead of one listing per directory
const PRESCAN_RECURSIVE_THRESHOLD: usize = 50;

/// Progress step for runs above [`LARGE_RUN`] entries
const LARGE_RUN_STEP: usize = 50;
const SMALL_RUN_STEP: usize = 10;
const LARGE_RUN: usize = 500;

/// Always report the last few files individually
const TAIL_FILES: usize = 5;

/// Chunk size for a plan of `total` upload entries
pub fn chunk_size(total: usize) -> usize {
    if total <= 50 {
        total.max(1)
    } else if total <= 500 {
        100
    } else {
        200
    }
}

/// Receives progress and per-entry outcomes from the engine
pub trait UploadObserver {
    /// `completed` of `total` upload entries are done
    fn on_progress(&mut self, _completed: usize, _total: usize, _label: &str) {}

    /// Entry `index` reached a final status
    fn on_status(&mut self, _index: usize, _entry: &PlanEntry) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

/// Counters for one engine run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub missing: usize,
    pub verified: usize,
    pub verify_failed: usize,
    /// Entries a dry run would have uploaded
    pub would_upload: usize,
    /// Sync tool invocations made for uploads
    pub batches: usize,
    pub failed_batches: usize,
    pub bytes_uploaded: u64,
    pub duration: Duration,
}

/// Decides when a progress callback is worth emitting
struct ProgressTracker {
    completed: usize,
    total: usize,
    step: usize,
}

impl ProgressTracker {
    fn new(total: usize) -> Self {
        let step = if total > LARGE_RUN {
            LARGE_RUN_STEP
        } else {
            SMALL_RUN_STEP
        };
        Self {
            completed: 0,
            total,
            step,
        }
    }

    fn should_emit(&self) -> bool {
        self.completed == 0
            || self.completed >= self.total
            || self.completed % self.step == 0
            || self.total - self.completed < TAIL_FILES
    }

    fn start(&self, observer: &mut dyn UploadObserver) {
        observer.on_progress(0, self.total, "Starting upload");
    }

    fn advance(&mut self, observer: &mut dyn UploadObserver) {
        self.completed += 1;
        if self.should_emit() {
            observer.on_progress(self.completed, self.total, "Uploading");
        }
    }

    fn finish(&self, observer: &mut dyn UploadObserver) {
        observer.on_progress(self.completed, self.total, "Upload complete");
    }
}

/// Applies a status change and reports it to the observer
fn settle(
    manifest: &mut Manifest,
    index: usize,
    status: EntryStatus,
    error: Option<String>,
    observer: &mut dyn UploadObserver,
) -> bool {
    let Some(entry) = manifest.entries.get_mut(index) else {
        return false;
    };
    if entry.set_status(status, error) {
        observer.on_status(index, entry);
        true
    } else {
        false
    }
}

/// Delivers plan entries to a remote through a [`SyncTool`]
pub struct UploadEngine<'a> {
    tool: &'a dyn SyncTool,
    remote: String,
    options: SyncOptions,
}

impl<'a> UploadEngine<'a> {
    pub fn new(tool: &'a dyn SyncTool, remote: impl Into<String>, options: SyncOptions) -> Self {
        Self {
            tool,
            remote: remote.into(),
            options,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Flags passed to every upload invocation
    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            ignore_existing: self.options.effective_skip_existing() && !self.options.uses_prescan(),
            ignore_times: self.options.force_overwrite,
            check_first: true,
            copy_links: true,
            progress: true,
            stats_one_line: true,
            verbose: log_enabled!(Level::Debug),
            transfers: self.options.parallel,
        }
    }

    /// Check the sync tool and remote before any work.
    ///
    /// For extracted backups the metadata sidecar is uploaded as
    /// `metadata/extraction-metadata-<stamp>.json`; failing that is only a warning.
    pub fn self_test(&self, metadata_file: Option<&Path>, cancel: &CancellationToken) -> Result<()> {
        if !self.tool.is_installed() {
            return Err(PhotosError::SyncToolMissing(self.tool.name().to_string()));
        }

        match self.tool.version() {
            Ok(version) => info!("Using {}", version),
            Err(e) => debug!("Could not read sync tool version: {}", e),
        }

        let name = remote_name(&self.remote);
        let remotes = self.tool.list_remotes()?;
        if !remotes.iter().any(|r| r == name) {
            return Err(PhotosError::RemoteUnknown(name.to_string()));
        }

        self.tool
            .lsd(&remote_root(&self.remote), cancel)
            .map_err(|e| match e {
                PhotosError::Cancelled => PhotosError::Cancelled,
                other => PhotosError::RemoteAuth {
                    remote: name.to_string(),
                    message: other.to_string(),
                },
            })?;
        debug!("Remote '{}' is reachable", name);

        if let Some(metadata) = metadata_file.filter(|p| p.is_file()) {
            let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
            let dest = build_remote_path(
                &self.remote,
                &format!("metadata/extraction-metadata-{}.json", stamp),
            );
            match self.tool.copyto(metadata, &dest, &CopyOptions::default(), cancel) {
                Ok(()) => info!("Uploaded extraction metadata to {}", dest),
                Err(PhotosError::Cancelled) => return Err(PhotosError::Cancelled),
                Err(e) => warn!("Could not upload extraction metadata: {}", e),
            }
        }

        Ok(())
    }

    /// Execute the plan, updating entry statuses in place.
    ///
    /// Returns `UploadBatchFailed` if any batch failed and `Cancelled` if the
    /// run was interrupted; in both cases the manifest holds partial progress.
    pub fn run(
        &self,
        manifest: &mut Manifest,
        observer: &mut dyn UploadObserver,
        cancel: &CancellationToken,
    ) -> Result<UploadReport> {
        let start = Instant::now();
        let mut report = UploadReport::default();

        for index in 0..manifest.entries.len() {
            let entry = &manifest.entries[index];
            if entry.action == PlanAction::Skip && entry.status == EntryStatus::Pending {
                debug!("Skipping existing {}", entry.target_path);
                if settle(manifest, index, EntryStatus::Skipped, None, observer) {
                    report.skipped += 1;
                }
            }
        }

        let planned = manifest.upload_indices();

        if self.options.dry_run {
            for &index in &planned {
                let entry = &manifest.entries[index];
                info!(
                    "[dry-run] {} -> {}",
                    entry.source_path.display(),
                    build_remote_path(&self.remote, &entry.target_path)
                );
            }
            report.would_upload = planned.len();
            observer.on_progress(planned.len(), planned.len(), "Dry run complete");
            report.duration = start.elapsed();
            return Ok(report);
        }

        let mut live = Vec::with_capacity(planned.len());
        for index in planned {
            if manifest.entries[index].source_path.is_file() {
                live.push(index);
            } else {
                warn!("Source missing: {}", manifest.entries[index].source_path.display());
                if settle(
                    manifest,
                    index,
                    EntryStatus::Missing,
                    Some("source file not found".to_string()),
                    observer,
                ) {
                    report.missing += 1;
                }
            }
        }

        let size = chunk_size(live.len());
        let chunk_count = live.len().div_ceil(size);
        let options = self.copy_options();
        let mut progress = ProgressTracker::new(live.len());
        let mut batch_errors: Vec<String> = Vec::new();
        let mut failed_entries = 0;

        info!(
            "Uploading {} file(s) in {} chunk(s) to {}",
            live.len(),
            chunk_count,
            self.remote
        );
        progress.start(observer);

        for (chunk_index, chunk) in live.chunks(size).enumerate() {
            if cancel.is_cancelled() {
                info!("Upload cancelled before chunk {}/{}", chunk_index + 1, chunk_count);
                return Err(PhotosError::Cancelled);
            }
            debug!("Chunk {}/{}: {} file(s)", chunk_index + 1, chunk_count, chunk.len());

            match self.upload_chunk(manifest, chunk, &options, &mut progress, &mut report, observer, cancel) {
                Ok(()) => {}
                Err(PhotosError::Cancelled) => return Err(PhotosError::Cancelled),
                Err(e) => {
                    let message = e.to_string();
                    warn!("Chunk {}/{} failed: {}", chunk_index + 1, chunk_count, message);
                    for &index in chunk {
                        if manifest.entries[index].status == EntryStatus::Pending
                            && settle(manifest, index, EntryStatus::Failed, Some(message.clone()), observer)
                        {
                            report.failed += 1;
                            failed_entries += 1;
                        }
                    }
                    report.failed_batches += 1;
                    batch_errors.push(message);
                }
            }
        }
        progress.finish(observer);

        if self.options.verify {
            self.verify(manifest, &mut report, observer, cancel)?;
        }

        report.duration = start.elapsed();

        if !batch_errors.is_empty() {
            return Err(PhotosError::UploadBatchFailed {
                failed_batches: batch_errors.len(),
                failed_entries,
                message: batch_errors.join("; "),
            });
        }

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn upload_chunk(
        &self,
        manifest: &mut Manifest,
        chunk: &[usize],
        options: &CopyOptions,
        progress: &mut ProgressTracker,
        report: &mut UploadReport,
        observer: &mut dyn UploadObserver,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &index in chunk {
            groups
                .entry(manifest.entries[index].target_dir().to_string())
                .or_default()
                .push(index);
        }

        for (dir, members) in groups {
            cancel.check()?;

            if let [index] = members.as_slice() {
                let entry = &manifest.entries[*index];
                let dest = build_remote_path(&self.remote, &entry.target_path);
                debug!("copyto {} -> {}", entry.source_path.display(), dest);
                report.batches += 1;
                self.tool.copyto(&entry.source_path, &dest, options, cancel)?;
            } else {
                let mut staging = StagingDir::new()?;
                for &index in &members {
                    let entry = &manifest.entries[index];
                    staging.stage(&entry.source_path, &entry.target_path)?;
                }

                let dest = build_remote_path(&self.remote, "");
                let label = format!("Uploading batch ({} files)", staging.len());
                let completed = progress.completed;
                let total = progress.total;
                debug!("copy {} file(s) for {} -> {}", staging.len(), dir, dest);
                report.batches += 1;
                self.tool.copy(
                    staging.root(),
                    &dest,
                    options,
                    &mut |line: &str| {
                        if line.contains("Transferred:") {
                            observer.on_progress(completed, total, &label);
                        }
                    },
                    cancel,
                )?;
            }

            for index in members {
                if settle(manifest, index, EntryStatus::Uploaded, None, observer) {
                    report.uploaded += 1;
                    report.bytes_uploaded += manifest.entries[index].file_size;
                }
                progress.advance(observer);
            }
        }

        Ok(())
    }

    /// Check each uploaded entry against the remote, one at a time
    fn verify(
        &self,
        manifest: &mut Manifest,
        report: &mut UploadReport,
        observer: &mut dyn UploadObserver,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let uploaded: Vec<usize> = manifest
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == EntryStatus::Uploaded)
            .map(|(i, _)| i)
            .collect();
        if uploaded.is_empty() {
            return Ok(());
        }

        info!("Verifying {} uploaded file(s)", uploaded.len());
        let total = uploaded.len();
        for (done, index) in uploaded.into_iter().enumerate() {
            cancel.check()?;
            let entry = &manifest.entries[index];
            let dest_dir = build_remote_path(&self.remote, entry.target_dir());

            let outcome = match self.tool.check(&entry.source_path, &dest_dir, &entry.filename, cancel) {
                Ok(true) => Ok(()),
                Ok(false) => Err("verification failed: remote copy differs or is missing".to_string()),
                Err(PhotosError::Cancelled) => return Err(PhotosError::Cancelled),
                Err(e) => Err(format!("verification error: {}", e)),
            };

            match outcome {
                Ok(()) => {
                    if settle(manifest, index, EntryStatus::Verified, None, observer) {
                        report.verified += 1;
                    }
                }
                Err(message) => {
                    warn!("{}: {}", manifest.entries[index].target_path, message);
                    if settle(manifest, index, EntryStatus::Failed, Some(message), observer) {
                        report.verify_failed += 1;
                        report.failed += 1;
                    }
                }
            }
            observer.on_progress(done + 1, total, "Verifying");
        }

        Ok(())
    }
}

impl RemoteInventory for UploadEngine<'_> {
    fn existing_paths(&self, targets: &[String], cancel: &CancellationToken) -> Result<HashSet<String>> {
        let dirs: BTreeSet<&str> = targets
            .iter()
            .map(|t| t.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(""))
            .collect();

        let mut existing = HashSet::new();
        if dirs.len() > PRESCAN_RECURSIVE_THRESHOLD {
            let depth = targets.iter().map(|t| t.split('/').count()).max();
            debug!("Pre-scanning {} recursively", self.remote);
            let root = build_remote_path(&self.remote, "");
            existing.extend(self.tool.lsf(&root, true, depth, cancel)?);
        } else {
            for dir in dirs {
                cancel.check()?;
                let listing = self
                    .tool
                    .lsf(&build_remote_path(&self.remote, dir), false, None, cancel)?;
                for name in listing {
                    if dir.is_empty() {
                        existing.insert(name);
                    } else {
                        existing.insert(format!("{}/{}", dir, name));
                    }
                }
            }
        }

        Ok(targets
            .iter()
            .filter(|t| existing.contains(t.as_str()))
            .cloned()
            .collect())
    }
}
