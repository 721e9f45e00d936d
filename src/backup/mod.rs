//! Backup reading
//!
//! # Submodules
//!
//! - `locator` - Find the backup root below a user-supplied path
//! - `manifest_index` - `Manifest.db` file index, encryption check
//! - `catalog` - Schema-adaptive `Photos.sqlite` reader
//! - `extracted` - Extracted trees and their metadata sidecar
//! - `source` - Hashed/extracted source selection and asset loading
//! - `device` - Device details from `Info.plist`

pub mod catalog;
pub mod device;
pub mod extracted;
pub mod locator;
pub mod manifest_index;
pub mod source;

pub use catalog::{core_data_to_utc, is_photo_catalog, CatalogRecord, CatalogSchema, PhotoCatalog};
pub use device::DeviceInfo;
pub use extracted::{ExtractedIndex, ExtractionMetadata};
pub use locator::{resolve_backup_root, BackupKind};
pub use manifest_index::{hashed_path, is_encrypted, FileIndexEntry, ManifestIndex};
pub use source::{BackupSource, LoadedAssets};
