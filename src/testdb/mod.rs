//! Test support
//!
//! Builds synthetic iOS backups on disk and stands in for the sync tool so
//! every stage can be exercised without a device, an rclone binary or a
//! network connection.
//!
//! # Submodules
//!
//! - `fixtures` - Hashed backup builder (Manifest.db, Photos.sqlite, plists, media)
//! - `mock_sync` - In-memory `SyncTool` with scriptable failures
//! - `integration` - End-to-end runs through the pipeline
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let fixture = BackupFixture::standard();
//! let tool = MockSyncTool::new(&["gdrive"]);
//! let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
//! assert!(tool.remote_contains("2024/04/15/photos/IMG_001.HEIC"));
//! ```

pub mod fixtures;
pub mod mock_sync;

mod integration;

pub use fixtures::{BackupFixture, BackupFixtureBuilder, CatalogVariant, FixtureAsset};
pub use mock_sync::{MockCall, MockSyncTool};
