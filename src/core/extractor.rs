//! Backup extraction
//!
//! Copies every regular file of a hashed backup into a domain-organized
//! tree (`<out>/<domain>/<relativePath>`) and writes the
//! `extraction-metadata.json` sidecar, so later runs can read assets from
//! the tree without the backup's databases.
//!
//! Per-file failures are counted and collected, never fatal. Cancellation
//! stops the copy loop and leaves the sidecar unwritten.

use crate::assets::Asset;
use crate::backup::catalog::PhotoCatalog;
use crate::backup::device::DeviceInfo;
use crate::backup::extracted::{CommandMetadata, ExtractionMetadata};
use crate::backup::manifest_index::{ensure_not_encrypted, FileIndexEntry, ManifestIndex};
use crate::core::cancel::CancellationToken;
use crate::core::checksum::sha1_file;
use crate::core::error::{PhotosError, Result};
use chrono::Utc;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

/// Domain used when composing paths for catalog assets with no index entry
const DEFAULT_MEDIA_DOMAIN: &str = "CameraRollDomain";

/// Extraction options
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Leave files that already exist in the output tree alone
    pub skip_existing: bool,
    /// Compare SHA-1 of source and copy after each file
    pub verify: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            skip_existing: true,
            verify: false,
        }
    }
}

/// Counters for one extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub total: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Domains seen, sorted
    pub domains: Vec<String>,
    pub bytes: u64,
    pub duration_ms: u64,
    /// One message per failed file
    #[serde(default)]
    pub errors: Vec<String>,
}

/// What an extraction produced
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub summary: ExtractionSummary,
    pub metadata_path: PathBuf,
    /// Catalog assets listed in the sidecar
    pub assets: usize,
}

/// Outcome of copying one file
enum FileOutcome {
    Extracted(u64),
    Skipped,
}

/// Destination of an index entry, or `None` when its path would escape `out`
fn target_for(out: &Path, entry: &FileIndexEntry) -> Option<PathBuf> {
    let rel = Path::new(&entry.relative_path);
    let safe = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || entry.domain.is_empty() || entry.domain.contains(['/', '\\']) {
        return None;
    }
    Some(out.join(&entry.domain).join(rel))
}

/// Stream `source` to `target`, creating parent directories
fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PhotosError::Io(format!("Failed to create '{}': {}", parent.display(), e))
        })?;
    }

    let input = File::open(source)
        .map_err(|e| PhotosError::Io(format!("Failed to open '{}': {}", source.display(), e)))?;
    let output = File::create(target)
        .map_err(|e| PhotosError::Io(format!("Failed to create '{}': {}", target.display(), e)))?;

    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);
    let bytes = std::io::copy(&mut reader, &mut writer)
        .map_err(|e| PhotosError::Io(format!("Failed to copy '{}': {}", source.display(), e)))?;
    writer
        .flush()
        .map_err(|e| PhotosError::Io(format!("Failed to write '{}': {}", target.display(), e)))?;
    Ok(bytes)
}

fn extract_one(source: &Path, target: &Path, options: &ExtractOptions) -> Result<FileOutcome> {
    if options.skip_existing && target.exists() {
        trace!("Exists, skipping: {}", target.display());
        return Ok(FileOutcome::Skipped);
    }

    let bytes = copy_file(source, target)?;

    if options.verify {
        let expected = sha1_file(source)?;
        let actual = sha1_file(target)?;
        if expected != actual {
            return Err(PhotosError::Io(format!(
                "checksum mismatch for '{}' (expected {}, got {})",
                target.display(),
                expected,
                actual
            )));
        }
    }

    Ok(FileOutcome::Extracted(bytes))
}

/// Extract a hashed backup into `out`.
///
/// `on_progress` is called with `(processed, total)` after each file.
pub fn extract_backup(
    root: &Path,
    out: &Path,
    options: &ExtractOptions,
    on_progress: &mut dyn FnMut(usize, usize),
    cancel: &CancellationToken,
) -> Result<ExtractionResult> {
    ensure_not_encrypted(root)?;
    let index = ManifestIndex::open(root)?;
    if !index.validate_schema()? {
        return Err(PhotosError::NotFound(format!(
            "no file index entries in {}",
            root.display()
        )));
    }

    let start = Instant::now();
    let files = index.regular_files()?;
    let total = files.len();
    info!("Extracting {} files from {} to {}", total, root.display(), out.display());

    fs::create_dir_all(out)
        .map_err(|e| PhotosError::Io(format!("Failed to create '{}': {}", out.display(), e)))?;

    let mut summary = ExtractionSummary {
        total,
        ..ExtractionSummary::default()
    };
    let mut domains = BTreeSet::new();
    // DCIM/... -> extracted path, for re-pointing catalog assets
    let mut dcim_targets: HashMap<String, PathBuf> = HashMap::new();

    for (processed, entry) in files.iter().enumerate() {
        cancel.check()?;
        domains.insert(entry.domain.clone());

        let result = match target_for(out, entry) {
            Some(target) => {
                let source = index.hashed_path(&entry.file_id);
                let outcome = extract_one(&source, &target, options);
                if outcome.is_ok() {
                    if let Some(pos) = entry.relative_path.find("DCIM/") {
                        dcim_targets
                            .entry(entry.relative_path[pos..].to_string())
                            .or_insert(target);
                    }
                }
                outcome
            }
            None => Err(PhotosError::InvalidInput(format!(
                "unsafe path {}/{}",
                entry.domain, entry.relative_path
            ))),
        };

        match result {
            Ok(FileOutcome::Extracted(bytes)) => {
                summary.extracted += 1;
                summary.bytes += bytes;
            }
            Ok(FileOutcome::Skipped) => summary.skipped += 1,
            Err(e) => {
                let message = format!("{}/{}: {}", entry.domain, entry.relative_path, e);
                warn!("{}", message);
                summary.failed += 1;
                summary.errors.push(message);
            }
        }

        on_progress(processed + 1, total);
    }

    summary.domains = domains.into_iter().collect();
    summary.duration_ms = start.elapsed().as_millis() as u64;

    let assets = catalog_assets(&index, out, &dcim_targets, cancel)?;
    let metadata = ExtractionMetadata {
        command_metadata: CommandMetadata {
            completed_at: Utc::now(),
            tool_version: Some(crate::VERSION.to_string()),
            source_backup: Some(root.to_path_buf()),
            device: Some(DeviceInfo::load(root)?).filter(|d| !d.is_empty()),
            summary: Some(summary.clone()),
        },
        assets,
    };
    let metadata_path = metadata.save(out)?;

    info!(
        "Extraction finished: {} extracted, {} skipped, {} failed ({} bytes)",
        summary.extracted, summary.skipped, summary.failed, summary.bytes
    );

    Ok(ExtractionResult {
        summary,
        metadata_path,
        assets: metadata.assets.len(),
    })
}

/// Catalog assets with source paths pointing into the extracted tree.
///
/// A backup without a readable photo catalog yields an empty list.
fn catalog_assets(
    index: &ManifestIndex,
    out: &Path,
    dcim_targets: &HashMap<String, PathBuf>,
    cancel: &CancellationToken,
) -> Result<Vec<Asset>> {
    let entry = match index.find_photo_database() {
        Ok(entry) => entry,
        Err(PhotosError::NotFound(msg)) => {
            warn!("No photo catalog in backup ({}); sidecar lists no assets", msg);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let catalog = match PhotoCatalog::open(&index.hashed_path(&entry.file_id)) {
        Ok(catalog) => catalog,
        Err(e @ PhotosError::CatalogSchema(_)) => return Err(e),
        Err(e) => {
            warn!("Photo catalog unreadable ({}); sidecar lists no assets", e);
            return Ok(Vec::new());
        }
    };

    let media_root = out.join(DEFAULT_MEDIA_DOMAIN).join("Media");
    let assets: Vec<Asset> = catalog
        .read_records(cancel)?
        .iter()
        .map(|record| {
            let rel = record.relative_path();
            let source = dcim_targets
                .get(&rel)
                .cloned()
                .unwrap_or_else(|| media_root.join(&rel));
            record.to_asset(source)
        })
        .collect();
    debug!("Sidecar lists {} catalog assets", assets.len());
    Ok(assets)
}
