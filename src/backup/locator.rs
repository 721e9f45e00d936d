//! Backup root resolution
//!
//! Users tend to point the tool at whatever folder they found the backup
//! in: the backup itself, the `MobileSync` folder holding `Backup/`, or
//! `Backup/` holding one device folder. This module walks those layouts.

use crate::core::error::{PhotosError, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar written by the extractor at the root of an extracted tree
pub const EXTRACTION_METADATA_FILE: &str = "extraction-metadata.json";

/// Hashed backups with more bucket directories than this are recognized
/// even without Manifest.db or Status.plist
const MIN_HASH_BUCKETS: usize = 10;

/// Kind of backup found at a resolved root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    /// Raw device backup: Manifest.db plus hashed bucket directories
    Hashed,
    /// Tree written by the extractor, with a metadata sidecar
    Extracted,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Hashed => "hashed",
            BackupKind::Extracted => "extracted",
        }
    }
}

/// True when `dir` looks like a raw device backup
pub fn is_backup_root(dir: &Path) -> bool {
    if !dir.join("Manifest.plist").is_file() {
        return false;
    }

    dir.join("Manifest.db").is_file()
        || dir.join("Status.plist").is_file()
        || count_hash_buckets(dir) > MIN_HASH_BUCKETS
}

/// True when `dir` holds an extraction metadata sidecar
pub fn is_extracted_root(dir: &Path) -> bool {
    dir.join(EXTRACTION_METADATA_FILE).is_file()
}

/// Classify a directory, if it is a backup root of either kind
pub fn detect_kind(dir: &Path) -> Option<BackupKind> {
    if is_extracted_root(dir) {
        Some(BackupKind::Extracted)
    } else if is_backup_root(dir) {
        Some(BackupKind::Hashed)
    } else {
        None
    }
}

/// Count two-character hexadecimal subdirectories
fn count_hash_buckets(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.len() == 2 && name.chars().all(|c| c.is_ascii_hexdigit()))
                .unwrap_or(false)
        })
        .count()
}

/// Resolve the backup root from a user-supplied path.
///
/// Returns the input itself when it is a root, a single backup below a
/// `Backup` folder, or the input unchanged so later validation reports what
/// is missing.
pub fn resolve_backup_root(input: &Path) -> Result<PathBuf> {
    if !input.exists() {
        return Err(PhotosError::InvalidInput(format!(
            "Backup path does not exist: {}",
            input.display()
        )));
    }
    if !input.is_dir() {
        return Err(PhotosError::InvalidInput(format!(
            "Backup path is not a directory: {}",
            input.display()
        )));
    }

    if detect_kind(input).is_some() {
        return Ok(input.to_path_buf());
    }

    let backup_dir = input.join("Backup");
    if backup_dir.is_dir() {
        if is_backup_root(&backup_dir) {
            debug!("Using backup root {}", backup_dir.display());
            return Ok(backup_dir);
        }

        let children: Vec<PathBuf> = fs::read_dir(&backup_dir)
            .map_err(|e| {
                PhotosError::Io(format!(
                    "Failed to read '{}': {}",
                    backup_dir.display(),
                    e
                ))
            })?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();

        if children.len() > 1 {
            return Err(PhotosError::AmbiguousBackup(backup_dir));
        }
        if let Some(only) = children.into_iter().next() {
            if is_backup_root(&only) {
                debug!("Using single device backup {}", only.display());
                return Ok(only);
            }
        }
    }

    let absolute = absolute_path(input);
    if let Ok(cwd) = std::env::current_dir() {
        if absolute == absolute_path(&cwd) {
            return Err(PhotosError::InvalidInput(format!(
                "The current directory ({}) is not an iOS backup. Pass the path to the backup folder.",
                cwd.display()
            )));
        }
    }

    Ok(input.to_path_buf())
}

fn absolute_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
