//! Backup sources
//!
//! A run reads assets either from a raw hashed backup (catalog + file index)
//! or from a tree written by the extractor (sidecar + filesystem index).
//! Both end in the same list of enriched, valid [`Asset`]s.

use crate::assets::Asset;
use crate::backup::catalog::PhotoCatalog;
use crate::backup::device::DeviceInfo;
use crate::backup::extracted::{find_media_domain, ExtractedIndex, ExtractionMetadata};
use crate::backup::locator::{detect_kind, BackupKind};
use crate::backup::manifest_index::{ensure_not_encrypted, ManifestIndex};
use crate::core::cancel::CancellationToken;
use crate::core::error::Result;
use log::{debug, info, trace, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Path fragments whose missing files are expected and not worth a warning
const QUIET_MISSING_MARKERS: &[&str] = &["derivatives", "Thumbnails", "PhotoData"];

/// Where a run's assets come from
#[derive(Debug)]
pub enum BackupSource {
    Hashed {
        root: PathBuf,
        index: ManifestIndex,
        catalog_path: PathBuf,
        /// Base for composed source paths when the index has no entry
        dcim_root: PathBuf,
        device: DeviceInfo,
    },
    Extracted {
        root: PathBuf,
        metadata: ExtractionMetadata,
        fs_index: ExtractedIndex,
    },
}

/// Result of loading assets from a source
#[derive(Debug, Default)]
pub struct LoadedAssets {
    pub assets: Vec<Asset>,
    /// Assets dropped because their source file is missing
    pub missing: usize,
    /// Assets dropped because they failed validation
    pub invalid: usize,
}

impl BackupSource {
    /// Open the source at a resolved backup root.
    ///
    /// Hashed backups are checked for encryption before anything else.
    pub fn open(root: &Path, cancel: &CancellationToken) -> Result<Self> {
        match detect_kind(root) {
            Some(BackupKind::Extracted) => {
                let metadata = ExtractionMetadata::load(root)?;
                let media_root = find_media_domain(root).unwrap_or_else(|| root.to_path_buf());
                debug!("Media domain: {}", media_root.display());
                let fs_index = ExtractedIndex::build(&media_root, cancel)?;
                Ok(BackupSource::Extracted {
                    root: root.to_path_buf(),
                    metadata,
                    fs_index,
                })
            }
            _ => {
                ensure_not_encrypted(root)?;
                let index = ManifestIndex::open(root)?;
                let entry = index.find_photo_database()?;
                let catalog_path = index.hashed_path(&entry.file_id);
                debug!(
                    "Photo catalog: {}/{} -> {}",
                    entry.domain,
                    entry.relative_path,
                    catalog_path.display()
                );
                Ok(BackupSource::Hashed {
                    root: root.to_path_buf(),
                    index,
                    catalog_path,
                    dcim_root: root.to_path_buf(),
                    device: DeviceInfo::load(root)?,
                })
            }
        }
    }

    pub fn kind(&self) -> BackupKind {
        match self {
            BackupSource::Hashed { .. } => BackupKind::Hashed,
            BackupSource::Extracted { .. } => BackupKind::Extracted,
        }
    }

    pub fn root(&self) -> &Path {
        match self {
            BackupSource::Hashed { root, .. } | BackupSource::Extracted { root, .. } => root,
        }
    }

    pub fn device(&self) -> DeviceInfo {
        match self {
            BackupSource::Hashed { device, .. } => device.clone(),
            BackupSource::Extracted { metadata, .. } => {
                metadata.command_metadata.device.clone().unwrap_or_default()
            }
        }
    }

    /// Sidecar file of an extracted tree
    pub fn metadata_file(&self) -> Option<PathBuf> {
        match self {
            BackupSource::Extracted { root, .. } => Some(ExtractionMetadata::path_for(root)),
            BackupSource::Hashed { .. } => None,
        }
    }

    /// Read, resolve and enrich every asset
    pub fn load_assets(&self, cancel: &CancellationToken) -> Result<LoadedAssets> {
        let candidates: Vec<Asset> = match self {
            BackupSource::Hashed {
                index,
                catalog_path,
                dcim_root,
                ..
            } => {
                let catalog = PhotoCatalog::open(catalog_path)?;
                let records = catalog.read_records(cancel)?;
                let dcim_map = index.dcim_file_map()?;

                records
                    .iter()
                    .map(|record| {
                        let rel = record.relative_path();
                        let source = match dcim_map.get(&rel) {
                            Some(file_id) => index.hashed_path(file_id),
                            None => dcim_root.join(&rel),
                        };
                        record.to_asset(source)
                    })
                    .collect()
            }
            BackupSource::Extracted {
                metadata, fs_index, ..
            } => metadata
                .assets
                .iter()
                .map(|asset| {
                    let mut asset = asset.clone();
                    asset.source_path = fs_index.resolve(&asset);
                    asset
                })
                .collect(),
        };

        cancel.check()?;
        let loaded = enrich_assets(candidates);
        info!(
            "Loaded {} assets from {} backup ({} missing, {} invalid)",
            loaded.assets.len(),
            self.kind().as_str(),
            loaded.missing,
            loaded.invalid
        );
        Ok(loaded)
    }
}

/// Fill in file sizes and drop assets whose source is gone or invalid
pub fn enrich_assets(candidates: Vec<Asset>) -> LoadedAssets {
    let mut loaded = LoadedAssets::default();

    for mut asset in candidates {
        match fs::metadata(&asset.source_path) {
            Ok(meta) if meta.is_file() => {
                asset.file_size = meta.len();
            }
            _ => {
                loaded.missing += 1;
                let path = asset.source_path.to_string_lossy();
                if QUIET_MISSING_MARKERS.iter().any(|m| path.contains(m)) {
                    trace!("Missing derivative: {}", path);
                } else {
                    warn!(
                        "Source file missing for {} ({}): {}",
                        asset.filename, asset.id, path
                    );
                }
                continue;
            }
        }

        if !asset.is_valid() {
            loaded.invalid += 1;
            debug!("Dropping invalid asset {:?}", asset.id);
            continue;
        }

        loaded.assets.push(asset);
    }

    loaded
}
