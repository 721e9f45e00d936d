//! Run orchestration
//!
//! Wires the stages together for the `sync`, `list` and `validate` commands:
//! locate the backup, open the source, load assets, filter and plan, upload,
//! and finalize the audit trail. Stages run one after another; the only
//! parallelism lives inside digest computation and the sync tool itself.

use crate::assets::{Asset, AssetType};
use crate::backup::catalog::PhotoCatalog;
use crate::backup::device::DeviceInfo;
use crate::backup::locator::{resolve_backup_root, BackupKind};
use crate::backup::manifest_index::is_encrypted;
use crate::backup::source::BackupSource;
use crate::core::audit::{AuditPaths, AuditTrail, AuditWriter, Invocation, RunOutcome};
use crate::core::cancel::CancellationToken;
use crate::core::config::SyncOptions;
use crate::core::error::{PhotosError, Result};
use crate::planner::{FilterStats, Manifest, Planner, RemoteInventory};
use crate::upload::engine::{UploadEngine, UploadObserver, UploadReport};
use crate::upload::sync_tool::SyncTool;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything a sync run needs
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub backup_path: PathBuf,
    pub remote: String,
    pub options: SyncOptions,
    /// Write the final manifest here
    pub save_manifest: Option<PathBuf>,
    /// Audit directory; `None` skips the audit trail
    pub audit_dir: Option<PathBuf>,
    /// Extra copy of the audit trail
    pub audit_copy: Option<PathBuf>,
    pub invocation: Invocation,
}

/// What a sync run produced, successful or not
#[derive(Debug)]
pub struct SyncOutcome {
    /// The plan with final statuses, once planning succeeded
    pub manifest: Option<Manifest>,
    pub report: Option<UploadReport>,
    pub audit: AuditTrail,
    pub audit_paths: Option<AuditPaths>,
    /// Assets dropped while loading (missing source, invalid)
    pub dropped_missing: usize,
    pub dropped_invalid: usize,
    pub result: Result<()>,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_cancelled())
    }
}

/// Mutable state collected while a sync runs
#[derive(Default)]
struct SyncState {
    manifest: Option<Manifest>,
    report: Option<UploadReport>,
    root: Option<PathBuf>,
    device: Option<DeviceInfo>,
    dropped_missing: usize,
    dropped_invalid: usize,
}

/// Run a full sync.
///
/// The audit trail is finalized and written whatever the outcome; failing
/// to write it only logs a warning.
pub fn run_sync(
    request: &SyncRequest,
    tool: &dyn SyncTool,
    observer: &mut dyn UploadObserver,
    cancel: &CancellationToken,
) -> SyncOutcome {
    let mut trail = AuditTrail::new(request.invocation.clone());
    trail.set_remote(&request.remote);

    let mut state = SyncState::default();
    let result = execute_sync(request, tool, observer, cancel, &mut state);

    if let Some(root) = &state.root {
        trail.set_source(root, state.device.clone());
    }
    if let Some(manifest) = state.manifest.as_mut() {
        manifest.refresh_summary();
        trail.record_entries(&manifest.entries);

        if let Some(path) = &request.save_manifest {
            if let Err(e) = manifest.save(path) {
                warn!("Failed to save manifest to {}: {}", path.display(), e);
            }
        }
    }

    let outcome = match &result {
        Ok(()) => RunOutcome::Completed,
        Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
        Err(_) => RunOutcome::Failed,
    };
    trail.finalize(outcome, result.as_ref().err().map(|e| e.to_string()));

    let audit_paths = match &request.audit_dir {
        Some(dir) => match AuditWriter::new(dir)
            .with_copy(request.audit_copy.clone())
            .write(&trail)
        {
            Ok(paths) => Some(paths),
            Err(e) => {
                warn!("{}", e);
                None
            }
        },
        None => {
            warn!("No audit directory available; audit trail not written");
            None
        }
    };

    SyncOutcome {
        manifest: state.manifest,
        report: state.report,
        audit: trail,
        audit_paths,
        dropped_missing: state.dropped_missing,
        dropped_invalid: state.dropped_invalid,
        result,
    }
}

fn execute_sync(
    request: &SyncRequest,
    tool: &dyn SyncTool,
    observer: &mut dyn UploadObserver,
    cancel: &CancellationToken,
    state: &mut SyncState,
) -> Result<()> {
    let options = &request.options;
    let root = resolve_backup_root(&request.backup_path)?;
    info!("Backup root: {}", root.display());
    state.root = Some(root.clone());

    let source = BackupSource::open(&root, cancel)?;
    state.device = Some(source.device());

    let engine = UploadEngine::new(tool, request.remote.clone(), options.clone());
    if options.dry_run {
        info!("Dry run: the sync tool will not be invoked");
    } else {
        engine.self_test(source.metadata_file().as_deref(), cancel)?;
    }

    let loaded = source.load_assets(cancel)?;
    state.dropped_missing = loaded.missing;
    state.dropped_invalid = loaded.invalid;

    let planner = Planner::new(options.clone())?;
    let inventory: Option<&dyn RemoteInventory> = if options.uses_prescan() && !options.dry_run {
        Some(&engine as &dyn RemoteInventory)
    } else {
        None
    };
    let manifest = planner.plan(loaded.assets, &root, &request.remote, inventory, cancel)?;
    info!(
        "Planned {} files: {} to upload, {} to skip",
        manifest.summary.total, manifest.summary.to_upload, manifest.summary.to_skip
    );

    let manifest = state.manifest.insert(manifest);
    let report = engine.run(manifest, observer, cancel)?;
    state.report = Some(report);
    Ok(())
}

/// Options for `list`
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub backup_path: PathBuf,
    pub options: SyncOptions,
}

/// Assets a sync would consider, with their targets
#[derive(Debug, Clone)]
pub struct ListReport {
    pub root: PathBuf,
    pub kind: BackupKind,
    pub device: DeviceInfo,
    /// Kept assets, `target_path` filled in
    pub assets: Vec<Asset>,
    pub filter: FilterStats,
    pub by_type: BTreeMap<AssetType, usize>,
    pub total_bytes: u64,
    pub dropped_missing: usize,
    pub dropped_invalid: usize,
}

/// Load and filter assets without touching any remote
pub fn run_list(request: &ListRequest, cancel: &CancellationToken) -> Result<ListReport> {
    let root = resolve_backup_root(&request.backup_path)?;
    let source = BackupSource::open(&root, cancel)?;
    let loaded = source.load_assets(cancel)?;

    let planner = Planner::new(request.options.clone())?;
    let (assets, filter) = planner.select(loaded.assets, cancel)?;

    let mut by_type = BTreeMap::new();
    let mut total_bytes = 0;
    for asset in &assets {
        *by_type.entry(asset.asset_type).or_insert(0) += 1;
        total_bytes += asset.file_size;
    }
    debug!("List: {} assets kept of {}", assets.len(), filter.input);

    Ok(ListReport {
        kind: source.kind(),
        device: source.device(),
        root,
        assets,
        filter,
        by_type,
        total_bytes,
        dropped_missing: loaded.missing,
        dropped_invalid: loaded.invalid,
    })
}

/// Result of `validate`
#[derive(Debug, Clone, Default)]
pub struct ValidateReport {
    pub root: PathBuf,
    pub kind: Option<BackupKind>,
    pub encrypted: bool,
    pub domains: usize,
    pub has_media: bool,
    pub catalog_path: Option<PathBuf>,
    /// `(field, chosen column or expression)` for the catalog query
    pub catalog_columns: Vec<(String, String)>,
    pub asset_count: usize,
    pub device: DeviceInfo,
}

/// Check that a backup can be synced, without loading every asset.
///
/// Encrypted backups and unreadable databases are errors.
pub fn run_validate(backup_path: &Path, cancel: &CancellationToken) -> Result<ValidateReport> {
    let root = resolve_backup_root(backup_path)?;
    let mut report = ValidateReport {
        root: root.clone(),
        encrypted: is_encrypted(&root)?,
        ..ValidateReport::default()
    };
    if report.encrypted {
        return Err(PhotosError::EncryptedBackup(root));
    }

    let source = BackupSource::open(&root, cancel)?;
    report.kind = Some(source.kind());
    report.device = source.device();

    match &source {
        BackupSource::Hashed {
            index,
            catalog_path,
            ..
        } => {
            report.domains = index.domains()?.len();
            report.has_media = index.has_media()?;

            let catalog = PhotoCatalog::open(catalog_path)?;
            report.catalog_columns = catalog
                .schema()
                .columns
                .iter()
                .map(|c| (c.field.to_string(), c.expression.clone()))
                .collect();
            report.asset_count = catalog.asset_count()?;
            report.catalog_path = Some(catalog_path.clone());
        }
        BackupSource::Extracted {
            metadata, fs_index, ..
        } => {
            report.domains = std::fs::read_dir(&root)?
                .flatten()
                .filter(|e| e.path().is_dir())
                .count();
            report.has_media = !fs_index.is_empty();
            report.asset_count = metadata.assets.len();
        }
    }

    info!(
        "Backup {} is valid ({} assets)",
        report.root.display(),
        report.asset_count
    );
    Ok(report)
}
