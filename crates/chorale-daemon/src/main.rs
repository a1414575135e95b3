//! Chorale daemon entry point.
//!
//! This binary starts the socket server that operators, viewers and control
//! clients connect to.

use std::path::PathBuf;

use chorale_core::config::{Config, Directories};
use chorale_daemon::ServerOptions;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Chorale daemon - live presentation session server
#[derive(Parser, Debug)]
#[command(name = "chorale-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Custom socket path (defaults to `$XDG_RUNTIME_DIR/chorale.sock` or `/tmp/chorale.sock`)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Also listen on this TCP address, e.g. `0.0.0.0:7777`
    #[arg(long, value_name = "ADDR")]
    tcp: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chorale={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("chorale-daemon-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        #[cfg(unix)]
        {
            let symlink_path = temp_dir.join("chorale-daemon.log");
            let _ = std::fs::remove_file(&symlink_path);
            let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
        }

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn config_path(args: &Args) -> Option<PathBuf> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }
    match Directories::new() {
        Ok(dirs) => {
            if let Err(e) = dirs.ensure_exists() {
                warn!("Failed to create {}: {e}", dirs.config.display());
            }
            Some(dirs.config_file)
        }
        Err(e) => {
            warn!("No config directory: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    setup_logging();

    info!("Starting chorale daemon...");

    let config_path = config_path(&args);
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    chorale_daemon::run(ServerOptions {
        socket_path: args.socket_path,
        tcp_listen: args.tcp,
        config,
        config_path,
    })
    .await?;

    info!("Chorale daemon stopped");
    Ok(())
}
