//! Progress bars and console output for the CLI
//!
//! Library code reports progress through callbacks; this module turns those
//! callbacks into `indicatif` bars that suspend cleanly when logging.

use crate::planner::{EntryStatus, PlanEntry};
use crate::upload::engine::UploadObserver;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::{Duration, Instant};

// ============================================================================
// Styles
// ============================================================================

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap()
        .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷")
}

fn progress_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.green} [{bar:40.cyan/dim}] {pos}/{len} ({percent}%) {msg}")
        .unwrap()
        .progress_chars("━━╾─")
}

fn completed_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  ✓ [{bar:40.green/dim}] {pos}/{len} ({percent}%) {msg}")
        .unwrap()
        .progress_chars("━━━")
}

// ============================================================================
// Console output helpers
// ============================================================================

/// Print a header section with a box
pub fn print_header(title: &str) {
    let width = 68;
    let title_padded = format!("{:^width$}", title, width = width - 4);
    println!();
    println!("╔{}╗", "═".repeat(width - 2));
    println!("║{}║", title_padded);
    println!("╚{}╝", "═".repeat(width - 2));
    println!();
}

pub fn print_success(msg: &str) {
    println!("  ✓ {}", msg);
}

pub fn print_info(msg: &str) {
    println!("  • {}", msg);
}

pub fn print_warning(msg: &str) {
    println!("  ⚠ {}", msg);
}

pub fn print_error(msg: &str) {
    println!("  ✗ {}", msg);
}

/// Print a `label: value` row aligned with the other summary rows
pub fn print_row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<22} {}", format!("{}:", label), value);
}

// ============================================================================
// Stage spinner
// ============================================================================

/// Spinner shown while a stage without a known length runs
pub struct StageSpinner {
    spinner: ProgressBar,
    start_time: Instant,
}

impl StageSpinner {
    pub fn new(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message(message.to_string());
        Self {
            spinner,
            start_time: Instant::now(),
        }
    }

    pub fn finish(&self, message: &str) {
        self.spinner.finish_with_message(format!(
            "✓ {} ({:.1}s)",
            message,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    pub fn finish_and_clear(&self) {
        self.spinner.finish_and_clear();
    }
}

// ============================================================================
// Upload progress
// ============================================================================

/// Upload bar fed by the engine's observer callbacks
pub struct UploadProgress {
    progress_bar: ProgressBar,
    start_time: Instant,
    bytes_done: u64,
    failures: usize,
}

impl UploadProgress {
    pub fn new() -> Self {
        let progress_bar = ProgressBar::new(0);
        progress_bar.set_style(progress_bar_style());
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        progress_bar.set_message("Starting...");

        Self {
            progress_bar,
            start_time: Instant::now(),
            bytes_done: 0,
            failures: 0,
        }
    }

    fn rate_message(&self, label: &str) -> String {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.bytes_done as f64 / elapsed / 1024.0 / 1024.0
        } else {
            0.0
        };
        format!("{} {:.1} MB/s", label, rate)
    }

    /// Log a message while suspending the progress display
    pub fn log(&self, msg: &str) {
        self.progress_bar.suspend(|| {
            println!("  {}", msg);
        });
    }

    pub fn finish(&self) {
        if self.failures > 0 {
            self.progress_bar.abandon_with_message(format!(
                "✗ {} file(s) failed",
                self.failures
            ));
            return;
        }
        self.progress_bar.set_style(completed_style());
        self.progress_bar.finish_with_message(format!(
            "Complete ({} in {})",
            format_bytes(self.bytes_done),
            format_duration(self.start_time.elapsed())
        ));
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadObserver for UploadProgress {
    fn on_progress(&mut self, completed: usize, total: usize, label: &str) {
        self.progress_bar.set_length(total as u64);
        self.progress_bar.set_position(completed as u64);
        let message = self.rate_message(label);
        self.progress_bar.set_message(message);
    }

    fn on_status(&mut self, _index: usize, entry: &PlanEntry) {
        match entry.status {
            EntryStatus::Uploaded => self.bytes_done += entry.file_size,
            EntryStatus::Failed => {
                self.failures += 1;
                if let Some(error) = &entry.error {
                    let line = format!("⚠ {}: {}", entry.target_path, error);
                    self.log(&line);
                }
            }
            EntryStatus::Missing => {
                let line = format!("⚠ {}: source missing", entry.source_path.display());
                self.log(&line);
            }
            _ => {}
        }
    }
}

// ============================================================================
// Extraction progress
// ============================================================================

/// Bar for `extract`, driven by `(done, total)` callbacks
pub struct ExtractProgress {
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl ExtractProgress {
    pub fn new() -> Self {
        let progress_bar = ProgressBar::new(0);
        progress_bar.set_style(progress_bar_style());
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        progress_bar.set_message("Copying files");
        Self {
            progress_bar,
            start_time: Instant::now(),
        }
    }

    pub fn update(&self, done: usize, total: usize) {
        self.progress_bar.set_length(total as u64);
        self.progress_bar.set_position(done as u64);
    }

    pub fn finish(&self) {
        self.progress_bar.set_style(completed_style());
        self.progress_bar.finish_with_message(format!(
            "Complete in {}",
            format_duration(self.start_time.elapsed())
        ));
    }

    pub fn finish_with_error(&self, msg: &str) {
        self.progress_bar.abandon_with_message(format!("✗ {}", msg));
    }
}

impl Default for ExtractProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

// ============================================================================
// Dual writer for file + console logging
// ============================================================================

/// Writes log output to stderr and a log file
pub struct DualWriter {
    pub console: std::io::Stderr,
    pub file: std::fs::File,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.console.write(buf);
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}
