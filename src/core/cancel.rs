//! Cooperative cancellation
//!
//! A single token is created per run and passed by parameter to every
//! long-running operation. Ctrl+C flips it; loops check it at chunk
//! boundaries and subprocess readers poll it while waiting.

use crate::core::error::{PhotosError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PhotosError::Cancelled)
        } else {
            Ok(())
        }
    }
}
