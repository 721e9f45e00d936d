//! Asset model
//!
//! Normalized photo/video records shared by the catalog reader, the
//! extracted-tree loader, the planner and the audit trail.
//!
//! # Submodules
//!
//! - `model` - `Asset`, `AssetType`, `AssetFlags`, classification and MIME mapping
//! - `target` - Date-based remote target paths

pub mod model;
pub mod target;

pub use model::{mime_type_for, Asset, AssetFlags, AssetType};
pub use target::{target_path, PathGranularity};
