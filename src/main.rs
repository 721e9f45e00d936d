//! gh-photos - CLI Entry Point
//!
//! Uploads photos and videos from an unencrypted iOS backup into a
//! date-organized rclone remote.
//!
//! This binary is a thin wrapper around the library, handling argument parsing,
//! logging setup, Ctrl+C handling and exit codes.

use clap::Parser;
use env_logger::Builder;
use gh_photos::cli::{self, Args, DualWriter};
use gh_photos::core::cancel::CancellationToken;
use gh_photos::core::config::{Config, LOG_LEVEL_ENV};
use gh_photos::core::error::PhotosError;
use log::{error, info, warn, LevelFilter};
use std::fs::OpenOptions;
use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit code for a run stopped by Ctrl+C
const EXIT_CANCELLED: i32 = 130;

fn main() {
    let args = Args::parse();

    let config = if let Some(ref config_path) = args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    } else {
        Config::load_default().unwrap_or_else(|e| {
            eprintln!("Warning: {}; using defaults", e);
            Config::default()
        })
    };

    init_logging(&config, args.log_level.as_deref());

    // First Ctrl+C cancels the run; a second one exits immediately
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    let requested = Arc::new(AtomicBool::new(false));
    if let Err(e) = ctrlc::set_handler(move || {
        if requested.swap(true, Ordering::SeqCst) {
            eprintln!("\nForce shutdown requested. Exiting immediately...");
            process::exit(EXIT_CANCELLED);
        }
        handler_token.cancel();
        eprintln!("\nCancelling... waiting for the current batch to stop (press Ctrl+C again to force quit)");
    }) {
        warn!("Failed to set Ctrl+C handler: {}", e);
    }

    info!("gh-photos v{}", gh_photos::VERSION);

    let code = match cli::run_command(&args, &config, &cancel) {
        Ok(()) => 0,
        Err(e) => {
            let cancelled = e
                .downcast_ref::<PhotosError>()
                .map(PhotosError::is_cancelled)
                .unwrap_or(false);
            if cancelled || cancel.is_cancelled() {
                EXIT_CANCELLED
            } else {
                error!("{:#}", e);
                1
            }
        }
    };
    process::exit(code);
}

/// Set up env_logger with the `[LEVEL] YYYY/MM/DD HH:MM:SS message` format.
///
/// The level comes from `--log-level`, then `LOG_LEVEL`, then the config file.
fn init_logging(config: &Config, flag: Option<&str>) {
    let env_value = std::env::var(LOG_LEVEL_ENV).ok();
    let level = config.effective_log_level(flag, env_value.as_deref());
    let filter = match level.as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let mut builder = Builder::new();
    builder.filter_level(filter).format(|buf, record| {
        writeln!(
            buf,
            "[{}] {} {}",
            record.level(),
            chrono::Local::now().format("%Y/%m/%d %H:%M:%S"),
            record.args()
        )
    });

    if config.logging.log_to_file {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.log_file)
        {
            Ok(log_file) => {
                builder.target(env_logger::Target::Pipe(Box::new(DualWriter {
                    console: std::io::stderr(),
                    file: log_file,
                })));
                builder.init();
                info!("Logging to file: {}", config.logging.log_file.display());
                return;
            }
            Err(e) => eprintln!(
                "Warning: cannot open log file {}: {}",
                config.logging.log_file.display(),
                e
            ),
        }
    }

    builder.init();
}
