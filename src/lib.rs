//! gh-photos Library
//!
//! Reads the photo library out of an unencrypted iOS backup (or a tree
//! produced by `extract`) and uploads it to an rclone remote laid out by
//! creation date, e.g. `2024/04/15/photos/IMG_0001.HEIC`.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`core`] - Configuration, errors, cancellation, digests, the extractor,
//!   the audit trail and run orchestration
//! - [`backup`] - Backup location, `Manifest.db` index, `Photos.sqlite`
//!   catalog, device info and the extracted-tree sidecar
//! - [`assets`] - Asset model, classification and remote target paths
//! - [`planner`] - Filters and the upload plan (manifest)
//! - [`upload`] - Sync tool adapter, staging and the upload engine
//! - [`cli`] - Command-line interface (only used by the binary)
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gh_photos::core::audit::Invocation;
//! use gh_photos::core::cancel::CancellationToken;
//! use gh_photos::core::config::Config;
//! use gh_photos::core::pipeline::{run_sync, SyncRequest};
//! use gh_photos::upload::{NoopObserver, Rclone};
//! use std::path::PathBuf;
//!
//! let config = Config::load_default().unwrap_or_default();
//! let request = SyncRequest {
//!     backup_path: PathBuf::from("/backups/00008030-001A"),
//!     remote: "gdrive:photos".to_string(),
//!     options: config.sync_options(),
//!     save_manifest: None,
//!     audit_dir: config.audit_dir(),
//!     audit_copy: None,
//!     invocation: Invocation::default(),
//! };
//!
//! let tool = Rclone::new("rclone");
//! let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
//! println!("success: {}", outcome.is_success());
//! ```

pub mod assets;
pub mod backup;
pub mod cli;
pub mod core;
pub mod planner;
pub mod upload;

#[cfg(test)]
pub mod testdb;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
