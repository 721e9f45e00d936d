//! Command handler implementations
//!
//! This module contains the implementation of all CLI commands.

use crate::cli::args::FilterArgs;
use crate::cli::progress::{
    format_bytes, format_duration, print_error, print_header, print_info, print_row,
    print_success, print_warning, ExtractProgress, StageSpinner, UploadProgress,
};
use crate::cli::{Args, Commands};
use crate::core::audit::Invocation;
use crate::core::cancel::CancellationToken;
use crate::core::config::{get_config_path, normalize_log_level, Config};
use crate::core::extractor::{extract_backup, ExtractOptions};
use crate::core::pipeline::{run_list, run_sync, run_validate, ListRequest, SyncOutcome, SyncRequest};
use crate::planner::FilterStats;
use crate::upload::sync_tool::Rclone;
use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dispatch the parsed command
pub fn run_command(args: &Args, config: &Config, cancel: &CancellationToken) -> Result<()> {
    match &args.command {
        Commands::Sync {
            backup_path,
            remote,
            filters,
            dry_run,
            parallel,
            skip_existing,
            force_overwrite,
            verify,
            checksum,
            remote_prescan,
            save_manifest,
            save_audit_manifest,
        } => {
            let mut options = config.sync_options();
            filters.apply(&mut options);
            options.dry_run = *dry_run;
            if let Some(parallel) = parallel {
                options.parallel = (*parallel).max(1);
            }
            if let Some(skip) = skip_existing {
                options.skip_existing = *skip;
            }
            options.force_overwrite |= *force_overwrite;
            options.verify |= *verify;
            options.checksum |= *checksum;
            options.remote_prescan |= *remote_prescan;

            let mut flags = options.non_default_flags();
            if let Some(level) = &args.log_level {
                let level = normalize_log_level(level);
                if level != "info" {
                    flags.push(format!("--log-level={}", level));
                }
            }
            if let Some(path) = save_manifest {
                flags.push(format!("--save-manifest={}", path.display()));
            }
            if let Some(path) = save_audit_manifest {
                flags.push(format!("--save-audit-manifest={}", path.display()));
            }

            let request = SyncRequest {
                backup_path: backup_path.clone(),
                remote: remote.clone(),
                options,
                save_manifest: save_manifest.clone(),
                audit_dir: config.audit_dir(),
                audit_copy: save_audit_manifest.clone(),
                invocation: Invocation {
                    command: "sync".to_string(),
                    args: vec![backup_path.display().to_string(), remote.clone()],
                    flags,
                },
            };
            sync(&request, config, cancel)
        }
        Commands::Validate { backup_path } => {
            let path = backup_path.clone().unwrap_or_else(|| PathBuf::from("."));
            validate(&path, cancel)
        }
        Commands::List {
            backup_path,
            filters,
            checksum,
        } => list(backup_path, filters, config, *checksum, cancel),
        Commands::Extract {
            backup_path,
            out,
            skip_existing,
            verify,
        } => extract(
            backup_path,
            out,
            ExtractOptions {
                skip_existing: *skip_existing,
                verify: *verify,
            },
            cancel,
        ),
        Commands::Config { path, reset } => handle_config_command(*path, *reset),
        Commands::GenerateConfig { output } => generate_config_file(output.clone()),
        Commands::ShowConfig => {
            show_config(config);
            Ok(())
        }
    }
}

// ============================================================================
// sync
// ============================================================================

fn sync(request: &SyncRequest, config: &Config, cancel: &CancellationToken) -> Result<()> {
    let tool = Rclone::new(&config.sync_tool.binary);
    if !request.options.dry_run {
        match tool.locate() {
            Some(path) => info!("Using sync tool at {}", path.display()),
            None => warn!("'{}' was not found in PATH", config.sync_tool.binary),
        }
    }

    info!("Syncing {} -> {}", request.backup_path.display(), request.remote);
    let mut progress = UploadProgress::new();
    let outcome = run_sync(request, &tool, &mut progress, cancel);
    progress.finish();

    print_sync_summary(&outcome, request.options.dry_run);
    outcome.result.map_err(anyhow::Error::from)
}

fn print_sync_summary(outcome: &SyncOutcome, dry_run: bool) {
    print_header(if dry_run { "DRY RUN SUMMARY" } else { "SYNC SUMMARY" });

    if let Some(device) = &outcome.audit.device {
        if !device.is_empty() {
            print_row("Device", device.describe());
        }
    }
    if let Some(manifest) = &outcome.manifest {
        let summary = &manifest.summary;
        print_row("Planned", summary.total);
        print_row("To upload", summary.to_upload);
        print_row("Skipped", summary.skipped);
        if dry_run {
            if let Some(report) = &outcome.report {
                print_row("Would upload", report.would_upload);
            }
        } else {
            print_row("Uploaded", summary.uploaded + summary.verified);
            if summary.verified > 0 {
                print_row("Verified", summary.verified);
            }
            print_row("Failed", summary.failed);
        }
        if summary.missing > 0 {
            print_row("Missing source", summary.missing);
        }
        print_row("Data", format_bytes(summary.bytes_uploaded));
        print_filter_stats(&manifest.filter);
    }
    if outcome.dropped_missing + outcome.dropped_invalid > 0 {
        print_row(
            "Dropped while loading",
            format!(
                "{} missing, {} invalid",
                outcome.dropped_missing, outcome.dropped_invalid
            ),
        );
    }
    if let Some(report) = &outcome.report {
        print_row("Duration", format_duration(report.duration));
    }
    if let Some(paths) = &outcome.audit_paths {
        print_row("Audit trail", paths.latest.display());
    }

    println!();
    match &outcome.result {
        Ok(()) => print_success("Sync completed"),
        Err(e) if e.is_cancelled() => print_warning("Sync cancelled; pending files were left untouched"),
        Err(e) => print_error(&format!("Sync failed: {}", e)),
    }
}

fn print_filter_stats(stats: &FilterStats) {
    let breakdown = stats.breakdown();
    if breakdown.is_empty() {
        return;
    }
    print_row("Excluded", stats.total_excluded());
    for (reason, count) in breakdown {
        println!("    - {}: {}", reason, count);
    }
}

// ============================================================================
// validate / list
// ============================================================================

fn validate(path: &Path, cancel: &CancellationToken) -> Result<()> {
    let spinner = StageSpinner::new("Validating backup...");
    let report = match run_validate(path, cancel) {
        Ok(report) => report,
        Err(e) => {
            spinner.finish_and_clear();
            print_error(&e.to_string());
            return Err(e.into());
        }
    };
    spinner.finish("Backup is valid");

    print_header("BACKUP");
    print_row("Root", report.root.display());
    if let Some(kind) = report.kind {
        print_row("Kind", kind.as_str());
    }
    print_row("Encrypted", if report.encrypted { "yes" } else { "no" });
    if !report.device.is_empty() {
        print_row("Device", report.device.describe());
    }
    print_row("Domains", report.domains);
    print_row("Media present", if report.has_media { "yes" } else { "no" });
    if let Some(catalog) = &report.catalog_path {
        print_row("Photo catalog", catalog.display());
    }
    for (field, column) in &report.catalog_columns {
        println!("    {:<20} {}", field, column);
    }
    print_row("Assets", report.asset_count);
    Ok(())
}

fn list(
    backup_path: &Path,
    filters: &FilterArgs,
    config: &Config,
    checksum: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let request = ListRequest {
        backup_path: backup_path.to_path_buf(),
        options: filters.to_options(config, checksum),
    };
    let spinner = StageSpinner::new("Reading backup...");
    let report = run_list(&request, cancel);
    spinner.finish_and_clear();
    let report = report?;

    println!(
        "{:<38} {:<11} {:<20} {:>10}  TARGET",
        "ID", "TYPE", "CREATED", "SIZE"
    );
    for asset in &report.assets {
        println!(
            "{:<38} {:<11} {:<20} {:>10}  {}",
            asset.id,
            asset.asset_type.as_str(),
            asset.creation_date.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(asset.file_size),
            asset.target_path.as_deref().unwrap_or("-")
        );
    }

    print_header("TOTALS");
    print_row("Source", format!("{} ({})", report.root.display(), report.kind.as_str()));
    for (asset_type, count) in &report.by_type {
        print_row(asset_type.as_str(), count);
    }
    print_row("Total", format!("{} ({})", report.assets.len(), format_bytes(report.total_bytes)));
    print_filter_stats(&report.filter);
    if report.dropped_missing > 0 {
        print_row("Missing source", report.dropped_missing);
    }
    if report.dropped_invalid > 0 {
        print_row("Invalid", report.dropped_invalid);
    }
    Ok(())
}

// ============================================================================
// extract
// ============================================================================

fn extract(
    backup_path: &Path,
    out: &Path,
    options: ExtractOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let root = crate::backup::locator::resolve_backup_root(backup_path)?;
    info!("Extracting {} -> {}", root.display(), out.display());

    let progress = ExtractProgress::new();
    let result = extract_backup(
        &root,
        out,
        &options,
        &mut |done, total| progress.update(done, total),
        cancel,
    );
    let result = match result {
        Ok(result) => {
            progress.finish();
            result
        }
        Err(e) => {
            progress.finish_with_error(&e.to_string());
            return Err(e.into());
        }
    };

    let summary = &result.summary;
    print_header("EXTRACTION SUMMARY");
    print_row("Files", summary.total);
    print_row("Extracted", summary.extracted);
    print_row("Skipped", summary.skipped);
    print_row("Failed", summary.failed);
    print_row("Domains", summary.domains.len());
    print_row("Data", format_bytes(summary.bytes));
    print_row("Duration", format_duration(Duration::from_millis(summary.duration_ms)));
    print_row("Catalog assets", result.assets);
    print_row("Metadata", result.metadata_path.display());
    for error in summary.errors.iter().take(10) {
        print_warning(error);
    }
    if summary.errors.len() > 10 {
        print_info(&format!("... and {} more", summary.errors.len() - 10));
    }
    Ok(())
}

// ============================================================================
// config
// ============================================================================

/// Print the config path, or reset the file to defaults
pub fn handle_config_command(show_path: bool, reset: bool) -> Result<()> {
    if reset {
        let path = get_config_path().context("No configuration directory on this platform")?;
        write_default_config(&path)?;
        info!("Created fresh config file at: {}", path.display());
        return Ok(());
    }

    let path = Config::get_active_config_path();
    println!("{}", path.display());
    if !show_path {
        if path.exists() {
            info!("Config file exists at: {}", path.display());
        } else {
            info!("No config file yet; run 'gh-photos generate-config' to create one");
        }
    }
    Ok(())
}

/// Generate a configuration file at the specified or default location
pub fn generate_config_file(output: Option<PathBuf>) -> Result<()> {
    let path = match output {
        Some(path) => path,
        None => get_config_path().context("No configuration directory on this platform")?,
    };
    write_default_config(&path)?;

    info!("Configuration file: {}", path.display());
    info!("Edit this file to change the sync defaults.");
    Ok(())
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, Config::generate_default_config())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Show the current configuration settings
pub fn show_config(config: &Config) {
    let config_path = Config::get_active_config_path();
    info!("Configuration file: {}", config_path.display());
    if !config_path.exists() {
        info!("(Using default settings - no config file found)");
    }
    info!("");
    info!("[sync]");
    info!("  parallel = {}", config.sync.parallel);
    info!("  skip_existing = {}", config.sync.skip_existing);
    info!("  force_overwrite = {}", config.sync.force_overwrite);
    info!("  verify = {}", config.sync.verify);
    info!("  checksum = {}", config.sync.checksum);
    info!("  remote_prescan = {}", config.sync.remote_prescan);
    info!("  path_granularity = \"{}\"", config.sync.path_granularity);
    info!("");
    info!("[filter]");
    info!("  include_hidden = {}", config.filter.include_hidden);
    info!(
        "  include_recently_deleted = {}",
        config.filter.include_recently_deleted
    );
    info!("  types = {:?}", config.filter.types);
    info!("  ignore_patterns = {:?}", config.filter.ignore_patterns);
    info!("");
    info!("[sync_tool]");
    info!("  binary = \"{}\"", config.sync_tool.binary);
    info!("");
    info!("[audit]");
    match config.audit_dir() {
        Some(dir) => info!("  directory = \"{}\"", dir.display()),
        None => info!("  directory = (unavailable)"),
    }
    info!("");
    info!("[logging]");
    info!("  level = \"{}\"", config.logging.level);
    info!("  log_to_file = {}", config.logging.log_to_file);
    info!("  log_file = \"{}\"", config.logging.log_file.display());
}
