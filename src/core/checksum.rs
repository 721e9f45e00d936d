//! File digests
//!
//! SHA-256 is used for the optional per-asset content digest recorded in the
//! plan and audit trail. SHA-1 is used by the extractor to verify that a
//! copied file matches its hashed source.

use crate::core::cancel::CancellationToken;
use crate::core::error::{PhotosError, Result};
use log::{debug, trace};
use rayon::prelude::*;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Buffer size for streaming hash computation (64KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Stream a file through any RustCrypto digest and return lowercase hex
fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| {
        PhotosError::Io(format!("Failed to open '{}': {}", path.display(), e))
    })?;

    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = D::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| {
            PhotosError::Io(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hash_to_hex(&hasher.finalize()))
}

/// Compute the SHA-256 of a file using streaming (memory-efficient)
pub fn sha256_file(path: &Path) -> Result<String> {
    digest_file::<Sha256>(path)
}

/// Compute the SHA-1 of a file using streaming
pub fn sha1_file(path: &Path) -> Result<String> {
    digest_file::<Sha1>(path)
}

/// Compute the SHA-1 of in-memory data
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hash_to_hex(&hasher.finalize())
}

/// Convert digest bytes to a hexadecimal string
pub fn hash_to_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compute SHA-256 digests for many files in parallel.
///
/// Results keep input order; a file that cannot be read yields `None`.
/// Returns `Cancelled` if the token fires while hashing.
pub fn sha256_many(paths: &[PathBuf], cancel: &CancellationToken) -> Result<Vec<Option<String>>> {
    let processed = AtomicUsize::new(0);
    let total = paths.len();

    let digests: Vec<Option<String>> = paths
        .par_iter()
        .map(|path| {
            if cancel.is_cancelled() {
                return None;
            }

            let current = processed.fetch_add(1, Ordering::Relaxed);
            if current % 100 == 0 {
                debug!("Hashing progress: {}/{} files", current, total);
            }

            match sha256_file(path) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    trace!("Failed to hash {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();

    cancel.check()?;
    Ok(digests)
}
