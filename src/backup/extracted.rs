//! Extracted backup trees
//!
//! An extracted tree is what `gh-photos extract` writes: one directory per
//! backup domain plus an `extraction-metadata.json` sidecar listing the
//! catalog assets. Source paths in the sidecar may point at a machine the
//! tree no longer lives on, so every asset is re-resolved against the files
//! actually present, using an index built with a single walk.

use crate::assets::Asset;
use crate::backup::device::DeviceInfo;
use crate::backup::locator::EXTRACTION_METADATA_FILE;
use crate::core::cancel::CancellationToken;
use crate::core::error::{PhotosError, Result};
use crate::core::extractor::ExtractionSummary;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Media domain directory names, checked in order
const MEDIA_DOMAIN_CANDIDATES: &[&str] = &[
    "CameraRollDomain",
    "MediaDomain",
    "CameraRollDomain-Media",
    "Media",
];

const DCIM: &str = "DCIM";

/// Files walked between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 1000;

/// Contents of `extraction-metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    #[serde(default)]
    pub assets: Vec<Asset>,
    pub command_metadata: CommandMetadata,
}

/// How and when the tree was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMetadata {
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_backup: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExtractionSummary>,
}

impl ExtractionMetadata {
    /// Sidecar path for a tree root
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(EXTRACTION_METADATA_FILE)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path_for(root);
        let file = File::open(&path).map_err(|e| {
            PhotosError::Io(format!("Failed to open '{}': {}", path.display(), e))
        })?;
        let metadata: Self = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            "Loaded extraction metadata: {} assets, completed {}",
            metadata.assets.len(),
            metadata.command_metadata.completed_at
        );
        Ok(metadata)
    }

    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let path = Self::path_for(root);
        let file = File::create(&path).map_err(|e| {
            PhotosError::Io(format!("Failed to create '{}': {}", path.display(), e))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(path)
    }
}

/// Find the directory holding camera-roll media in an extracted tree
pub fn find_media_domain(root: &Path) -> Option<PathBuf> {
    for candidate in MEDIA_DOMAIN_CANDIDATES {
        let dir = root.join(candidate);
        if dir.is_dir() {
            return Some(dir);
        }
    }

    let mut domains: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains("Domain"))
                .unwrap_or(false)
        })
        .collect();
    domains.sort();
    domains.into_iter().next()
}

/// Portion of a path after its first `DCIM` component, `/`-joined
pub fn after_dcim(path: &Path) -> Option<String> {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
    let pos = parts.iter().position(|p| *p == DCIM)?;
    let rest = &parts[pos + 1..];
    if rest.is_empty() {
        None
    } else {
        Some(rest.join("/"))
    }
}

/// Index of the DCIM files under a media domain
#[derive(Debug, Default)]
pub struct ExtractedIndex {
    by_name: HashMap<String, Vec<PathBuf>>,
    by_dcim_path: HashMap<String, PathBuf>,
    dcim_root: PathBuf,
}

impl ExtractedIndex {
    /// Walk `media_root` once, indexing every file inside a DCIM tree
    pub fn build(media_root: &Path, cancel: &CancellationToken) -> Result<Self> {
        let dcim_root = [media_root.join("Media").join(DCIM), media_root.join(DCIM)]
            .into_iter()
            .find(|p| p.is_dir())
            .unwrap_or_else(|| media_root.join("Media").join(DCIM));

        let mut index = Self {
            dcim_root,
            ..Self::default()
        };

        let mut walked = 0usize;
        for entry in WalkDir::new(media_root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    trace!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            walked += 1;
            if walked % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let in_dcim = path
                .components()
                .any(|c| matches!(c, Component::Normal(name) if name == DCIM));
            if !in_dcim {
                continue;
            }

            if let Some(rel) = after_dcim(path) {
                index
                    .by_dcim_path
                    .entry(rel)
                    .or_insert_with(|| path.to_path_buf());
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                index
                    .by_name
                    .entry(name.to_string())
                    .or_default()
                    .push(path.to_path_buf());
            }
        }

        cancel.check()?;
        debug!(
            "Indexed {} DCIM files ({} names) under {}",
            index.by_dcim_path.len(),
            index.by_name.len(),
            media_root.display()
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.by_dcim_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dcim_path.is_empty()
    }

    pub fn dcim_root(&self) -> &Path {
        &self.dcim_root
    }

    /// Resolve where an asset's bytes live in this tree.
    ///
    /// Post-DCIM path match first, then the first file with the same name,
    /// then a guess under the primary DCIM root.
    pub fn resolve(&self, asset: &Asset) -> PathBuf {
        let rel = after_dcim(&asset.source_path);

        if let Some(found) = rel.as_ref().and_then(|r| self.by_dcim_path.get(r)) {
            return found.clone();
        }

        if let Some(found) = self
            .by_name
            .get(&asset.filename)
            .and_then(|paths| paths.first())
        {
            return found.clone();
        }

        match rel {
            Some(rel) => self.dcim_root.join(rel),
            None => self.dcim_root.join(&asset.filename),
        }
    }
}
