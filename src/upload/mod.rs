//! Upload to the remote through the external sync tool
//!
//! # Submodules
//!
//! - `remote` - Remote spec parsing and path joining
//! - `staging` - Link-or-copy staging directories
//! - `sync_tool` - Sync tool adapter and the rclone implementation
//! - `engine` - Chunked uploads, pre-scan, verification and self-test

pub mod engine;
pub mod remote;
pub mod staging;
pub mod sync_tool;

pub use engine::{chunk_size, NoopObserver, UploadEngine, UploadObserver, UploadReport};
pub use remote::{build_remote_path, remote_name, split_remote};
pub use staging::{link_or_copy, LinkMethod, StagingDir};
pub use sync_tool::{CopyOptions, Rclone, SyncTool};
