//! Filtering and upload planning
//!
//! # Submodules
//!
//! - `filter` - Include/exclude rules with per-reason counters
//! - `plan` - Plan entries, manifests and the planner

pub mod filter;
pub mod plan;

pub use filter::{AssetFilter, ExclusionReason, FilterStats, IgnorePattern};
pub use plan::{
    EntryStatus, Manifest, ManifestSummary, PlanAction, PlanEntry, Planner, RemoteInventory,
};
