//! External sync tool adapter
//!
//! The upload engine talks to the sync tool only through [`SyncTool`], so
//! tests can substitute an in-memory fake. [`Rclone`] is the real
//! implementation: it owns argv assembly, streams stdout line by line,
//! captures stderr, and kills the child when the run is cancelled.

use crate::core::cancel::CancellationToken;
use crate::core::error::{PhotosError, Result};
use crate::upload::staging::link_or_copy;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, trace};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// How often the reader loop checks for cancellation and child exit
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flags for `copy` and `copyto`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub ignore_existing: bool,
    pub ignore_times: bool,
    pub check_first: bool,
    pub copy_links: bool,
    pub progress: bool,
    pub stats_one_line: bool,
    pub verbose: bool,
    /// Parallel transfers; 0 leaves the tool's default
    pub transfers: usize,
}

impl CopyOptions {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.ignore_existing {
            args.push("--ignore-existing".to_string());
        }
        if self.ignore_times {
            args.push("--ignore-times".to_string());
        }
        if self.check_first {
            args.push("--check-first".to_string());
        }
        if self.copy_links {
            args.push("--copy-links".to_string());
        }
        if self.progress {
            args.push("--progress".to_string());
        }
        if self.stats_one_line {
            args.push("--stats-one-line".to_string());
        }
        if self.verbose {
            args.push("-v".to_string());
        }
        if self.transfers > 0 {
            args.push("--transfers".to_string());
            args.push(self.transfers.to_string());
        }
        args
    }
}

/// Operations the upload engine needs from a sync tool
pub trait SyncTool {
    /// Binary name, for messages
    fn name(&self) -> &str;

    /// Whether the tool can be found
    fn is_installed(&self) -> bool;

    fn version(&self) -> Result<String>;

    /// Configured remote names, without the trailing colon
    fn list_remotes(&self) -> Result<Vec<String>>;

    /// Top-level directories of a remote path
    fn lsd(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Files under a remote path, relative to it. A missing path lists as empty.
    fn lsf(&self, path: &str, recursive: bool, max_depth: Option<usize>, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Copy a directory tree to a remote path; `on_line` sees each stdout line
    fn copy(
        &self,
        source_dir: &Path,
        dest: &str,
        options: &CopyOptions,
        on_line: &mut dyn FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Copy one file to an exact remote path
    fn copyto(&self, source_file: &Path, dest: &str, options: &CopyOptions, cancel: &CancellationToken) -> Result<()>;

    /// Compare one local file with the remote object `<dest_dir>/<filename>`.
    ///
    /// The local name of `source_file` does not matter.
    fn check(&self, source_file: &Path, dest_dir: &str, filename: &str, cancel: &CancellationToken) -> Result<bool>;
}

/// Captured output of a finished command
#[derive(Debug, Default)]
struct CommandOutput {
    stdout: Vec<String>,
    stderr: String,
}

/// rclone, invoked as a subprocess
#[derive(Debug, Clone)]
pub struct Rclone {
    binary: String,
}

impl Default for Rclone {
    fn default() -> Self {
        Self::new("rclone")
    }
}

impl Rclone {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Full path of the binary, if found in PATH
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.binary).ok()
    }

    /// Run the tool, feeding stdout lines to `on_line` as they arrive.
    ///
    /// The child inherits the environment. On cancellation it is killed and
    /// reaped before `Cancelled` is returned.
    fn run(&self, args: &[String], cancel: &CancellationToken, on_line: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        debug!("Running: {}", command_line);
        cancel.check()?;

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PhotosError::SyncToolMissing(self.binary.clone())
                } else {
                    PhotosError::Io(format!("Failed to start '{}': {}", command_line, e))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PhotosError::Io("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PhotosError::Io("child stderr not captured".to_string()))?;

        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        let stdout_reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(std::io::Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_reader = thread::spawn(move || {
            let mut captured = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut captured);
            captured
        });

        let mut output = CommandOutput::default();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    trace!("{}: {}", self.binary, line);
                    on_line(&line);
                    output.stdout.push(line);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = loop {
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                let _ = child.kill();
                break child.wait()?;
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let _ = stdout_reader.join();
        output.stderr = stderr_reader.join().unwrap_or_default();

        if cancelled {
            debug!("{} cancelled", command_line);
            return Err(PhotosError::Cancelled);
        }

        if !status.success() {
            return Err(PhotosError::SyncToolFailed {
                command: command_line,
                code: status.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }

    fn run_quiet(&self, args: &[String], cancel: &CancellationToken) -> Result<CommandOutput> {
        self.run(args, cancel, &mut |_| {})
    }
}

/// Escape rclone filter metacharacters in a literal filename
fn escape_filter(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_directory_not_found(err: &PhotosError) -> bool {
    match err {
        PhotosError::SyncToolFailed { code, stderr, .. } => {
            *code == Some(3) || stderr.contains("directory not found")
        }
        _ => false,
    }
}

impl SyncTool for Rclone {
    fn name(&self) -> &str {
        &self.binary
    }

    fn is_installed(&self) -> bool {
        self.locate().is_some()
    }

    fn version(&self) -> Result<String> {
        let output = self.run_quiet(&["version".to_string()], &CancellationToken::new())?;
        Ok(output
            .stdout
            .into_iter()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn list_remotes(&self) -> Result<Vec<String>> {
        let output = self.run_quiet(&["listremotes".to_string()], &CancellationToken::new())?;
        Ok(output
            .stdout
            .iter()
            .map(|line| line.trim().trim_end_matches(':').to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    fn lsd(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let output = self.run_quiet(&["lsd".to_string(), path.to_string()], cancel)?;
        // "          -1 2024-04-15 10:00:00        -1 2024"
        Ok(output
            .stdout
            .iter()
            .filter_map(|line| line.split_whitespace().last().map(str::to_string))
            .collect())
    }

    fn lsf(&self, path: &str, recursive: bool, max_depth: Option<usize>, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut args = vec!["lsf".to_string(), path.to_string(), "--files-only".to_string()];
        if recursive {
            args.push("-R".to_string());
        }
        if let Some(depth) = max_depth {
            args.push("--max-depth".to_string());
            args.push(depth.to_string());
        }

        match self.run_quiet(&args, cancel) {
            Ok(output) => Ok(output
                .stdout
                .into_iter()
                .map(|line| line.trim_end().to_string())
                .filter(|line| !line.is_empty())
                .collect()),
            Err(e) if is_directory_not_found(&e) => {
                trace!("{} does not exist yet", path);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn copy(
        &self,
        source_dir: &Path,
        dest: &str,
        options: &CopyOptions,
        on_line: &mut dyn FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut args = vec![
            "copy".to_string(),
            source_dir.to_string_lossy().into_owned(),
            dest.to_string(),
        ];
        args.extend(options.to_args());
        self.run(&args, cancel, on_line).map(|_| ())
    }

    fn copyto(&self, source_file: &Path, dest: &str, options: &CopyOptions, cancel: &CancellationToken) -> Result<()> {
        let mut args = vec![
            "copyto".to_string(),
            source_file.to_string_lossy().into_owned(),
            dest.to_string(),
        ];
        args.extend(options.to_args());
        self.run_quiet(&args, cancel).map(|_| ())
    }

    fn check(&self, source_file: &Path, dest_dir: &str, filename: &str, cancel: &CancellationToken) -> Result<bool> {
        // Hashed backups name files by id, so stage the source under its remote name
        let staging = tempfile::TempDir::new()
            .map_err(|e| PhotosError::Io(format!("Failed to create check directory: {}", e)))?;
        link_or_copy(source_file, &staging.path().join(filename))?;

        let args = vec![
            "check".to_string(),
            staging.path().to_string_lossy().into_owned(),
            dest_dir.to_string(),
            "--one-way".to_string(),
            "--copy-links".to_string(),
            "--include".to_string(),
            format!("/{}", escape_filter(filename)),
        ];

        match self.run_quiet(&args, cancel) {
            Ok(_) => Ok(true),
            Err(PhotosError::SyncToolFailed { stderr, .. }) => {
                debug!("check failed for {}: {}", filename, stderr);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
