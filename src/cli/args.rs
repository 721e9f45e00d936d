//! Command-line argument definitions
//!
//! This module defines all CLI arguments and subcommands using clap.

use crate::assets::PathGranularity;
use crate::core::config::{Config, SyncOptions};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Upload photos and videos from an unencrypted iOS backup into a date-organized remote
#[derive(Parser, Debug)]
#[command(name = "gh-photos")]
#[command(version)]
#[command(about = "Upload photos and videos from an iOS backup into a date-organized rclone remote", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides LOG_LEVEL and config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload the backup's media to a remote, organized by date
    Sync {
        /// Backup directory (or a directory holding exactly one backup)
        backup_path: PathBuf,

        /// Remote as `name:` or `name:base/path`
        remote: String,

        #[command(flatten)]
        filters: FilterArgs,

        /// Show what would be uploaded without invoking the sync tool
        #[arg(long)]
        dry_run: bool,

        /// Number of parallel transfers
        #[arg(long, value_name = "N")]
        parallel: Option<usize>,

        /// Leave files that already exist on the remote alone
        #[arg(long, value_name = "BOOL")]
        skip_existing: Option<bool>,

        /// Overwrite remote files even when they already exist
        #[arg(long)]
        force_overwrite: bool,

        /// Check every uploaded file against the remote afterwards
        #[arg(long)]
        verify: bool,

        /// Compute SHA-256 digests for every asset
        #[arg(long)]
        checksum: bool,

        /// List the remote first and plan existing files as skips
        #[arg(long)]
        remote_prescan: bool,

        /// Write the final plan with per-file status to this path
        #[arg(long, value_name = "FILE")]
        save_manifest: Option<PathBuf>,

        /// Write an extra copy of the audit trail to this path
        #[arg(long, value_name = "FILE")]
        save_audit_manifest: Option<PathBuf>,
    },

    /// Check that a backup is readable and unencrypted
    Validate {
        /// Backup directory (defaults to the current directory)
        backup_path: Option<PathBuf>,
    },

    /// List the assets a sync would consider and where they would go
    List {
        /// Backup directory
        backup_path: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,

        /// Compute SHA-256 digests for every asset
        #[arg(long)]
        checksum: bool,
    },

    /// Copy a hashed backup into a readable domain tree
    Extract {
        /// Backup directory
        backup_path: PathBuf,

        /// Output directory
        out: PathBuf,

        /// Keep files already present in the output with the same size
        #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
        skip_existing: bool,

        /// Check each copied file's SHA-1 against its file id
        #[arg(long)]
        verify: bool,
    },

    /// Show the configuration file location
    ///
    /// The config file is searched at:
    /// - ./gh-photos.toml
    /// - Linux: ~/.config/gh-photos/config.toml
    /// - macOS: ~/Library/Application Support/gh-photos/config.toml
    /// - Windows: %APPDATA%\gh-photos\config.toml
    Config {
        /// Print the config file path
        #[arg(long)]
        path: bool,

        /// Reset config to defaults (creates a fresh config file)
        #[arg(long)]
        reset: bool,
    },

    /// Generate a commented configuration file
    GenerateConfig {
        /// Output path for the config file (defaults to standard location)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show current configuration
    ShowConfig,
}

/// Filter flags shared by `sync` and `list`
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Include assets hidden in the Photos app
    #[arg(long)]
    pub include_hidden: bool,

    /// Include assets in Recently Deleted
    #[arg(long)]
    pub include_recently_deleted: bool,

    /// Comma-separated asset types: photo, video, screenshot, burst, live_photo
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,

    /// Only assets created on or after this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub start_date: Option<NaiveDate>,

    /// Only assets created on or before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<NaiveDate>,

    /// Glob pattern of filenames or paths to ignore (repeatable)
    #[arg(long = "ignore-pattern", value_name = "GLOB")]
    pub ignore_patterns: Vec<String>,

    /// Depth of the date hierarchy: year, month or day
    #[arg(long, value_name = "LEVEL")]
    pub path_granularity: Option<PathGranularity>,
}

impl FilterArgs {
    /// Apply the flags on top of options built from the config file
    pub fn apply(&self, options: &mut SyncOptions) {
        options.include_hidden |= self.include_hidden;
        options.include_recently_deleted |= self.include_recently_deleted;
        if !self.types.is_empty() {
            options.types = self
                .types
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        options.start_date = self.start_date.or(options.start_date);
        options.end_date = self.end_date.or(options.end_date);
        options
            .ignore_patterns
            .extend(self.ignore_patterns.iter().cloned());
        if let Some(granularity) = self.path_granularity {
            options.granularity = granularity;
        }
    }

    /// Options for a listing: config defaults plus these flags
    pub fn to_options(&self, config: &Config, checksum: bool) -> SyncOptions {
        let mut options = config.sync_options();
        self.apply(&mut options);
        options.checksum |= checksum;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_flags() {
        let args = Args::try_parse_from([
            "gh-photos",
            "sync",
            "/backups/abc",
            "gdrive:photos",
            "--types",
            "photo,video",
            "--start-date",
            "2024-01-01",
            "--ignore-pattern",
            "*.AAE",
            "--ignore-pattern",
            "IMG_9*",
            "--path-granularity",
            "month",
            "--parallel",
            "4",
            "--skip-existing",
            "false",
            "--dry-run",
        ])
        .unwrap();

        match args.command {
            Commands::Sync {
                backup_path,
                remote,
                filters,
                dry_run,
                parallel,
                skip_existing,
                ..
            } => {
                assert_eq!(backup_path, PathBuf::from("/backups/abc"));
                assert_eq!(remote, "gdrive:photos");
                assert_eq!(filters.types, vec!["photo", "video"]);
                assert_eq!(filters.ignore_patterns.len(), 2);
                assert_eq!(filters.path_granularity, Some(PathGranularity::Month));
                assert_eq!(
                    filters.start_date,
                    NaiveDate::from_ymd_opt(2024, 1, 1)
                );
                assert!(dry_run);
                assert_eq!(parallel, Some(4));
                assert_eq!(skip_existing, Some(false));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invalid_granularity_rejected() {
        let result = Args::try_parse_from([
            "gh-photos",
            "list",
            "/b",
            "--path-granularity",
            "week",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_skip_existing_default() {
        let args = Args::try_parse_from(["gh-photos", "extract", "/b", "/out"]).unwrap();
        match args.command {
            Commands::Extract { skip_existing, verify, .. } => {
                assert!(skip_existing);
                assert!(!verify);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_filter_args_override_config() {
        let filters = FilterArgs {
            include_hidden: true,
            types: vec![" video ".to_string()],
            ignore_patterns: vec!["*.AAE".to_string()],
            path_granularity: Some(PathGranularity::Year),
            ..FilterArgs::default()
        };
        let mut config = Config::default();
        config.filter.ignore_patterns = vec!["*.tmp".to_string()];

        let options = filters.to_options(&config, false);
        assert!(options.include_hidden);
        assert_eq!(options.types, vec!["video"]);
        assert_eq!(options.ignore_patterns, vec!["*.tmp", "*.AAE"]);
        assert_eq!(options.granularity, PathGranularity::Year);
    }
}
