//! Core functionality module
//!
//! Configuration, errors, cancellation and digests shared by every stage,
//! plus the extractor, the audit trail and the run pipeline.
//!
//! # Submodules
//!
//! - `audit` - Audit trail accumulation and persistence
//! - `cancel` - Cooperative cancellation token
//! - `checksum` - SHA-256 and SHA-1 file digests
//! - `config` - Configuration loading, saving, and sync options
//! - `error` - Error types and result aliases
//! - `extractor` - Hashed backup to domain tree extraction
//! - `pipeline` - `sync`, `list` and `validate` orchestration

pub mod audit;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod error;
pub mod extractor;
pub mod pipeline;
