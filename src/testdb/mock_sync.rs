//! In-memory sync tool
//!
//! [`MockSyncTool`] implements [`SyncTool`] against a map of remote paths to
//! file contents. It records every call, can be told to fail uploads whose
//! paths match a pattern, and can flip a cancellation token after a number
//! of uploads.

use crate::core::cancel::CancellationToken;
use crate::core::error::{PhotosError, Result};
use crate::upload::remote::split_remote;
use crate::upload::sync_tool::{CopyOptions, SyncTool};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// One recorded invocation
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Version,
    ListRemotes,
    Lsd { path: String },
    Lsf { path: String, recursive: bool },
    Copy { source: PathBuf, dest: String, files: usize },
    CopyTo { source: PathBuf, dest: String },
    Check { source: PathBuf, dest: String },
}

#[derive(Default)]
struct MockState {
    remote: BTreeMap<String, Vec<u8>>,
    calls: Vec<MockCall>,
    writes: usize,
    uploads: usize,
    fail_patterns: Vec<String>,
    fail_checks: HashSet<String>,
    fail_lsd: bool,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// Scriptable stand-in for rclone
pub struct MockSyncTool {
    installed: bool,
    remotes: Vec<String>,
    state: Mutex<MockState>,
}

/// Remote path without the `name:` prefix and surrounding slashes
fn remote_key(path: &str) -> String {
    split_remote(path).1.trim_matches('/').to_string()
}

fn join_key(prefix: &str, rel: &str) -> String {
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", prefix, rel)
    }
}

impl MockSyncTool {
    /// An installed tool that knows the given remote names
    pub fn new(remotes: &[&str]) -> Self {
        Self {
            installed: true,
            remotes: remotes.iter().map(|r| r.to_string()).collect(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// A tool that is not in PATH
    pub fn not_installed() -> Self {
        Self {
            installed: false,
            ..Self::new(&[])
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put a file on the remote (path without the remote name)
    pub fn seed_remote(&self, path: &str) {
        self.state()
            .remote
            .insert(path.trim_matches('/').to_string(), b"seeded".to_vec());
    }

    /// Fail any upload touching a path that contains `pattern`
    pub fn fail_uploads_matching(&self, pattern: &str) {
        self.state().fail_patterns.push(pattern.to_string());
    }

    /// Report a verification mismatch for `filename`
    pub fn fail_check_for(&self, filename: &str) {
        self.state().fail_checks.insert(filename.to_string());
    }

    /// Make `lsd` fail as an unreachable remote would
    pub fn fail_lsd(&self) {
        self.state().fail_lsd = true;
    }

    /// Cancel `token` once `uploads` upload calls have succeeded
    pub fn cancel_after_uploads(&self, uploads: usize, token: CancellationToken) {
        self.state().cancel_after = Some((uploads, token));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn copy_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Copy { .. }))
            .count()
    }

    pub fn lsf_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Lsf { .. }))
            .count()
    }

    /// Remote paths currently present
    pub fn remote_files(&self) -> Vec<String> {
        self.state().remote.keys().cloned().collect()
    }

    pub fn remote_contains(&self, path: &str) -> bool {
        self.state().remote.contains_key(path.trim_matches('/'))
    }

    /// Number of file writes performed, overwrites included
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    fn failure(command: &str, dest: &str) -> PhotosError {
        PhotosError::SyncToolFailed {
            command: format!("rclone {} {}", command, dest),
            code: Some(1),
            stderr: "Failed to copy: simulated failure".to_string(),
        }
    }

    /// Store files, honoring ignore-existing, and count the upload
    fn store(&self, files: Vec<(String, Vec<u8>)>, options: &CopyOptions) {
        let mut state = self.state();
        for (key, content) in files {
            if options.ignore_existing && state.remote.contains_key(&key) {
                continue;
            }
            state.remote.insert(key, content);
            state.writes += 1;
        }
        state.uploads += 1;
        if let Some((after, token)) = &state.cancel_after {
            if state.uploads >= *after {
                token.cancel();
            }
        }
    }
}

impl SyncTool for MockSyncTool {
    fn name(&self) -> &str {
        "mock-rclone"
    }

    fn is_installed(&self) -> bool {
        self.installed
    }

    fn version(&self) -> Result<String> {
        if !self.installed {
            return Err(PhotosError::SyncToolMissing(self.name().to_string()));
        }
        self.state().calls.push(MockCall::Version);
        Ok("rclone v1.66.0 (mock)".to_string())
    }

    fn list_remotes(&self) -> Result<Vec<String>> {
        self.state().calls.push(MockCall::ListRemotes);
        Ok(self.remotes.clone())
    }

    fn lsd(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        cancel.check()?;
        let mut state = self.state();
        state.calls.push(MockCall::Lsd {
            path: path.to_string(),
        });
        if state.fail_lsd {
            return Err(PhotosError::SyncToolFailed {
                command: format!("rclone lsd {}", path),
                code: Some(1),
                stderr: "couldn't fetch token".to_string(),
            });
        }
        let prefix = remote_key(path);
        let dirs: std::collections::BTreeSet<String> = state
            .remote
            .keys()
            .filter_map(|k| {
                let rest = if prefix.is_empty() {
                    k.as_str()
                } else {
                    k.strip_prefix(&format!("{}/", prefix))?
                };
                rest.split_once('/').map(|(dir, _)| dir.to_string())
            })
            .collect();
        Ok(dirs.into_iter().collect())
    }

    fn lsf(&self, path: &str, recursive: bool, max_depth: Option<usize>, cancel: &CancellationToken) -> Result<Vec<String>> {
        cancel.check()?;
        let mut state = self.state();
        state.calls.push(MockCall::Lsf {
            path: path.to_string(),
            recursive,
        });
        let prefix = remote_key(path);
        Ok(state
            .remote
            .keys()
            .filter_map(|k| {
                let rest = if prefix.is_empty() {
                    k.as_str()
                } else {
                    k.strip_prefix(&format!("{}/", prefix))?
                };
                let depth = rest.split('/').count();
                let within = if recursive {
                    max_depth.map_or(true, |max| depth <= max)
                } else {
                    depth == 1
                };
                within.then(|| rest.to_string())
            })
            .collect())
    }

    fn copy(
        &self,
        source_dir: &Path,
        dest: &str,
        options: &CopyOptions,
        on_line: &mut dyn FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        let prefix = remote_key(dest);

        let mut files = Vec::new();
        for entry in WalkDir::new(source_dir).follow_links(options.copy_links) {
            let entry = entry.map_err(|e| PhotosError::Io(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source_dir)
                .map_err(|e| PhotosError::Io(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read(entry.path())?;
            files.push((join_key(&prefix, &rel), content));
        }

        self.state().calls.push(MockCall::Copy {
            source: source_dir.to_path_buf(),
            dest: dest.to_string(),
            files: files.len(),
        });

        let fails = {
            let state = self.state();
            files
                .iter()
                .any(|(key, _)| state.fail_patterns.iter().any(|p| key.contains(p.as_str())))
        };
        if fails {
            return Err(Self::failure("copy", dest));
        }

        on_line(&format!(
            "Transferred:   {} / {}, 100%",
            files.len(),
            files.len()
        ));
        self.store(files, options);
        Ok(())
    }

    fn copyto(&self, source_file: &Path, dest: &str, options: &CopyOptions, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        self.state().calls.push(MockCall::CopyTo {
            source: source_file.to_path_buf(),
            dest: dest.to_string(),
        });

        let key = remote_key(dest);
        let fails = self
            .state()
            .fail_patterns
            .iter()
            .any(|p| key.contains(p.as_str()));
        if fails {
            return Err(Self::failure("copyto", dest));
        }

        let content = fs::read(source_file)?;
        self.store(vec![(key, content)], options);
        Ok(())
    }

    fn check(&self, source_file: &Path, dest_dir: &str, filename: &str, cancel: &CancellationToken) -> Result<bool> {
        cancel.check()?;
        let mut state = self.state();
        state.calls.push(MockCall::Check {
            source: source_file.to_path_buf(),
            dest: join_key(dest_dir, filename),
        });

        if state.fail_checks.contains(filename) {
            return Ok(false);
        }

        let key = join_key(&remote_key(dest_dir), filename);
        let local = fs::read(source_file)?;
        Ok(state.remote.get(&key) == Some(&local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_and_list() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("2024/04")).unwrap();
        fs::write(temp.path().join("2024/04/a.jpg"), b"a").unwrap();

        let tool = MockSyncTool::new(&["r"]);
        tool.copy(
            temp.path(),
            "r:base",
            &CopyOptions::default(),
            &mut |_| {},
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(tool.remote_contains("base/2024/04/a.jpg"));
        let cancel = CancellationToken::new();
        assert_eq!(tool.lsf("r:base/2024/04", false, None, &cancel).unwrap(), vec!["a.jpg"]);
        assert!(tool.lsf("r:base", false, None, &cancel).unwrap().is_empty());
        assert_eq!(tool.lsf("r:base", true, None, &cancel).unwrap(), vec!["2024/04/a.jpg"]);
        assert_eq!(tool.lsd("r:", &cancel).unwrap(), vec!["base"]);
    }

    #[test]
    fn test_ignore_existing_keeps_first_copy() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.jpg");
        fs::write(&file, b"a").unwrap();

        let tool = MockSyncTool::new(&["r"]);
        let options = CopyOptions {
            ignore_existing: true,
            ..CopyOptions::default()
        };
        let cancel = CancellationToken::new();
        tool.copyto(&file, "r:x/a.jpg", &options, &cancel).unwrap();
        tool.copyto(&file, "r:x/a.jpg", &options, &cancel).unwrap();
        assert_eq!(tool.writes(), 1);
        assert!(tool.check(&file, "r:x", "a.jpg", &cancel).unwrap());
        assert!(!tool.check(&file, "r:x", "b.jpg", &cancel).unwrap());
    }
}
