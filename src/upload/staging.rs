//! Staging directories
//!
//! Each upload batch is staged as a temporary tree mirroring the remote
//! layout. Files are linked rather than copied where the platform allows;
//! the sync tool is run with `--copy-links` so links upload as content.

use crate::core::error::{PhotosError, Result};
use log::trace;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// How a staged file was materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMethod {
    Symlink,
    Hardlink,
    Copy,
}

#[cfg(unix)]
fn symlink_file(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn symlink_file(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, target)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_source: &Path, _target: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks not supported",
    ))
}

/// Place `source` at `target`: symlink, else hard link, else byte copy.
///
/// Parent directories of `target` are created as needed.
pub fn link_or_copy(source: &Path, target: &Path) -> Result<LinkMethod> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PhotosError::Io(format!("Failed to create '{}': {}", parent.display(), e))
        })?;
    }

    // Symlinks must be absolute to stay valid from the staging dir
    let absolute = fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());

    match symlink_file(&absolute, target) {
        Ok(()) => return Ok(LinkMethod::Symlink),
        Err(e) => trace!("symlink {} failed: {}", target.display(), e),
    }

    match fs::hard_link(source, target) {
        Ok(()) => return Ok(LinkMethod::Hardlink),
        Err(e) => trace!("hard link {} failed: {}", target.display(), e),
    }

    fs::copy(source, target).map_err(|e| {
        PhotosError::Io(format!(
            "Failed to stage '{}' at '{}': {}",
            source.display(),
            target.display(),
            e
        ))
    })?;
    Ok(LinkMethod::Copy)
}

/// A temporary mirror of part of the remote tree.
///
/// The directory is removed when the value is dropped.
pub struct StagingDir {
    dir: TempDir,
    files: usize,
}

impl StagingDir {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("gh-photos-stage-")
            .tempdir()
            .map_err(|e| PhotosError::Io(format!("Failed to create staging directory: {}", e)))?;
        Ok(Self { dir, files: 0 })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn len(&self) -> usize {
        self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    /// Stage `source` at the `/`-separated relative path `rel`
    pub fn stage(&mut self, source: &Path, rel: &str) -> Result<PathBuf> {
        let target = rel
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.dir.path().to_path_buf(), |acc, part| acc.join(part));
        link_or_copy(source, &target)?;
        self.files += 1;
        Ok(target)
    }
}
