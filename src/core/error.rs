//! Error types for gh-photos
//!
//! One variant per failure kind the run can surface. Most are fatal and end
//! the run; per-file problems (missing sources, extraction failures) are
//! handled locally and never reach this type.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for backup parsing, planning and uploading
#[derive(Error, Debug)]
pub enum PhotosError {
    /// Bad user input: missing path, not a directory, unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A `Backup` folder holds several device backups
    #[error("Multiple backups found in '{}'; ambiguous, specify the exact backup path", .0.display())]
    AmbiguousBackup(PathBuf),

    /// Manifest.plist marks the backup as encrypted
    #[error("Encrypted backups are not supported: {}", .0.display())]
    EncryptedBackup(PathBuf),

    /// Manifest.db missing, unopenable or with an unexpected `Files` schema
    #[error("Backup index error: {0}")]
    IndexSchema(String),

    /// Photos.sqlite lacks a column the reader cannot do without
    #[error("Photo catalog schema error: {0}")]
    CatalogSchema(String),

    /// A single catalog row failed to decode
    #[error("Failed to decode catalog row (column '{column}'): {message}")]
    RowDecode { column: String, message: String },

    /// A lookup in the backup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The sync tool binary is not in PATH
    #[error("Sync tool '{0}' not found in PATH. Install it and try again.")]
    SyncToolMissing(String),

    /// The configured remote is unknown to the sync tool
    #[error("Remote '{0}' is not configured in the sync tool")]
    RemoteUnknown(String),

    /// The remote is configured but could not be reached or authenticated
    #[error("Remote '{remote}' is not accessible: {message}")]
    RemoteAuth { remote: String, message: String },

    /// A sync tool subprocess exited unsuccessfully
    #[error("Sync tool command '{command}' failed (exit code {code:?}): {stderr}")]
    SyncToolFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// One or more upload batches failed; their entries are marked failed
    #[error("{failed_batches} upload batch(es) failed, {failed_entries} file(s) not uploaded: {message}")]
    UploadBatchFailed {
        failed_batches: usize,
        failed_entries: usize,
        message: String,
    },

    /// The run was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Writing the audit trail failed
    #[error("Failed to write audit trail: {0}")]
    AuditWrite(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(String),

    /// SQLite error not covered by a more specific kind
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PhotosError {
    /// True when the error represents a cancelled run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PhotosError::Cancelled)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PhotosError>;

impl From<std::io::Error> for PhotosError {
    fn from(err: std::io::Error) -> Self {
        PhotosError::Io(err.to_string())
    }
}
