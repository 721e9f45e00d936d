//! Configuration module for gh-photos
//!
//! Supports loading defaults from a TOML file. Search order:
//! - ./gh-photos.toml (current directory)
//! - <config dir>/gh-photos/config.toml
//!   (Linux: ~/.config, macOS: ~/Library/Application Support, Windows: %APPDATA%)
//!
//! Command-line flags override file values; the merged result is a
//! [`SyncOptions`], which is also what gets recorded in the run manifest.

use crate::assets::PathGranularity;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application name used for config and audit directories
pub const APP_NAME: &str = "gh-photos";

/// Default config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Local override file name, checked before the standard location
const LOCAL_CONFIG_FILE_NAME: &str = "gh-photos.toml";

/// Environment variable that sets the default log level
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Get the standard configuration directory for the application.
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Get the standard configuration file path.
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Directory where audit trails are written: `<home>/gh-photos`
pub fn default_audit_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_NAME))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upload behaviour
    pub sync: SyncConfig,

    /// Asset selection
    pub filter: FilterConfig,

    /// External sync tool
    pub sync_tool: SyncToolConfig,

    /// Audit trail output
    pub audit: AuditConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Upload behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Parallel transfers passed to the sync tool
    pub parallel: usize,

    /// Do not re-upload files that already exist on the remote
    pub skip_existing: bool,

    /// Re-upload even when the remote copy looks identical
    pub force_overwrite: bool,

    /// Check every uploaded file against the remote after the run
    pub verify: bool,

    /// Compute SHA-256 digests of every planned file
    pub checksum: bool,

    /// List the remote before uploading and plan existing files as skipped
    pub remote_prescan: bool,

    /// Remote folder layout: year, month or day
    pub path_granularity: PathGranularity,
}

/// Asset selection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Include assets hidden in the Photos app
    pub include_hidden: bool,

    /// Include assets in "Recently Deleted"
    pub include_recently_deleted: bool,

    /// Asset types to include (empty = all)
    pub types: Vec<String>,

    /// Ignore patterns applied to source paths and filenames
    pub ignore_patterns: Vec<String>,
}

/// Sync tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncToolConfig {
    /// Binary name or path
    pub binary: String,
}

/// Audit trail configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Override for the audit directory (default: ~/gh-photos)
    pub directory: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log to file
    pub log_to_file: bool,

    /// Log file path
    pub log_file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallel: 1,
            skip_existing: true,
            force_overwrite: false,
            verify: false,
            checksum: false,
            remote_prescan: false,
            path_granularity: PathGranularity::Day,
        }
    }
}

impl Default for SyncToolConfig {
    fn default() -> Self {
        Self {
            binary: "rclone".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("./gh-photos.log"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// If no config file is found, returns default configuration.
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(config_path) = get_config_path() {
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Get the path where the config file is (or would be) located.
    pub fn get_active_config_path() -> PathBuf {
        let local = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }

        get_config_path().unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE_NAME))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::WriteError(path.as_ref().to_path_buf(), e.to_string()))?;

        Ok(())
    }

    /// Generate a default config file with comments
    pub fn generate_default_config() -> String {
        include_str!("../../config.example.toml").to_string()
    }

    /// Resolve the effective log level.
    ///
    /// Priority: explicit flag, then `LOG_LEVEL`, then the config file.
    pub fn effective_log_level(&self, flag: Option<&str>, env_value: Option<&str>) -> String {
        let candidate = flag
            .map(str::to_string)
            .or_else(|| env_value.map(str::to_string))
            .unwrap_or_else(|| self.logging.level.clone());
        normalize_log_level(&candidate)
    }

    /// Build sync options from the file defaults. CLI overrides are applied
    /// on the returned value.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            dry_run: false,
            include_hidden: self.filter.include_hidden,
            include_recently_deleted: self.filter.include_recently_deleted,
            parallel: self.sync.parallel.max(1),
            skip_existing: self.sync.skip_existing,
            force_overwrite: self.sync.force_overwrite,
            types: self.filter.types.clone(),
            start_date: None,
            end_date: None,
            verify: self.sync.verify,
            checksum: self.sync.checksum,
            ignore_patterns: self.filter.ignore_patterns.clone(),
            granularity: self.sync.path_granularity,
            remote_prescan: self.sync.remote_prescan,
        }
    }

    /// Audit directory, honoring the config override
    pub fn audit_dir(&self) -> Option<PathBuf> {
        self.audit.directory.clone().or_else(default_audit_dir)
    }
}

/// Normalize a log level string: trimmed, lowercased, unknown values become `info`
pub fn normalize_log_level(level: &str) -> String {
    let level = level.trim().to_lowercase();
    match level.as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => level,
        "warning" => "warn".to_string(),
        _ => "info".to_string(),
    }
}

/// Effective options for a sync/list run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub include_hidden: bool,
    pub include_recently_deleted: bool,
    pub parallel: usize,
    pub skip_existing: bool,
    pub force_overwrite: bool,
    pub types: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub verify: bool,
    pub checksum: bool,
    pub ignore_patterns: Vec<String>,
    pub granularity: PathGranularity,
    pub remote_prescan: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Config::default().sync_options()
    }
}

impl SyncOptions {
    /// Whether existing remote files should be left alone.
    /// `force_overwrite` wins over `skip_existing`.
    pub fn effective_skip_existing(&self) -> bool {
        self.skip_existing && !self.force_overwrite
    }

    /// Whether the planner should ask the remote for existing paths
    pub fn uses_prescan(&self) -> bool {
        self.effective_skip_existing() && self.remote_prescan
    }

    /// Non-default flags, for the audit trail's invocation record.
    /// Defaults (parallel 1, skip-existing on, log level info) are omitted.
    pub fn non_default_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.dry_run {
            flags.push("--dry-run".to_string());
        }
        if self.include_hidden {
            flags.push("--include-hidden".to_string());
        }
        if self.include_recently_deleted {
            flags.push("--include-recently-deleted".to_string());
        }
        if self.parallel != 1 {
            flags.push(format!("--parallel={}", self.parallel));
        }
        if !self.skip_existing {
            flags.push("--skip-existing=false".to_string());
        }
        if self.force_overwrite {
            flags.push("--force-overwrite".to_string());
        }
        if !self.types.is_empty() {
            flags.push(format!("--types={}", self.types.join(",")));
        }
        if let Some(start) = self.start_date {
            flags.push(format!("--start-date={}", start));
        }
        if let Some(end) = self.end_date {
            flags.push(format!("--end-date={}", end));
        }
        if self.verify {
            flags.push("--verify".to_string());
        }
        if self.checksum {
            flags.push("--checksum".to_string());
        }
        for pattern in &self.ignore_patterns {
            flags.push(format!("--ignore-pattern={}", pattern));
        }
        if self.granularity != PathGranularity::Day {
            flags.push(format!("--path-granularity={}", self.granularity));
        }
        flags
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file was not found at the specified path
    FileNotFound(PathBuf),
    /// Failed to read the configuration file
    ReadError(PathBuf, String),
    /// Failed to parse the configuration file (invalid TOML)
    ParseError(PathBuf, String),
    /// Failed to serialize configuration to TOML
    SerializeError(String),
    /// Failed to write configuration file
    WriteError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ReadError(path, err) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), err)
            }
            ConfigError::ParseError(path, err) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), err)
            }
            ConfigError::SerializeError(err) => {
                write!(f, "Failed to serialize configuration: {}", err)
            }
            ConfigError::WriteError(path, err) => {
                write!(f, "Failed to write config file '{}': {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
