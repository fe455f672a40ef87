//! # tmux-buffer-sync
//!
//! Share tmux copy buffers between servers through atuin kv.
//!
//! ## Commands
//!
//! - `init`: Initialize server identity and default settings
//! - `daemon`: Run periodic sync and serve the control socket
//! - `sync-now`: Pull then push right away
//! - `sync-status`: Show sync status
//! - `notify-copy`: Report a local copy (tmux hook)
//! - `stop`: Stop the daemon
//!
//! ## Example
//!
//! ```bash
//! # Initialize server
//! tmux-buffer-sync init
//!
//! # Start the daemon (usually from tmux.conf)
//! tmux-buffer-sync daemon &
//!
//! # Sync on demand
//! tmux-buffer-sync sync-now
//!
//! # Check status
//! tmux-buffer-sync sync-status
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod control;

use commands::{daemon, init, notify, status, stop, sync_now};
use config::{AppConfig, Overrides, Paths};

/// Share tmux copy buffers between servers through atuin kv.
#[derive(Parser, Debug)]
#[command(name = "tmux-buffer-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for identity, state, settings and the daemon socket
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file (default: <data-dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of buffers to sync and keep in the namespace
    #[arg(long, global = true)]
    count: Option<usize>,

    /// Seconds between periodic syncs
    #[arg(long, global = true)]
    frequency: Option<u64>,

    /// Namespace in the atuin kv store
    #[arg(long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize server identity and default settings
    Init,

    /// Run periodic sync and serve the control socket
    Daemon,

    /// Pull then push right away
    SyncNow,

    /// Show sync status
    SyncStatus,

    /// Report a local copy (called from the tmux hook)
    NotifyCopy,

    /// Stop the running daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.command);

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config::set_dir_permissions_0700(&data_dir).await?;

    let paths = Paths::new(data_dir, cli.config);
    let overrides = Overrides {
        count: cli.count,
        frequency: cli.frequency,
        namespace: cli.namespace,
    };

    match cli.command {
        Commands::Init => {
            init::run(&paths).await?;
        }
        Commands::Stop => {
            stop::run(&paths).await?;
        }
        Commands::SyncStatus => {
            let config = match AppConfig::load(paths.clone(), &overrides).await {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: {:#}; showing defaults", e);
                    AppConfig::fallback(paths)
                }
            };
            status::run(&config).await?;
        }
        Commands::Daemon => {
            let config = AppConfig::load(paths, &overrides).await?;
            daemon::run(&config).await?;
        }
        Commands::SyncNow => {
            let config = AppConfig::load(paths, &overrides).await?;
            sync_now::run(&config).await?;
        }
        Commands::NotifyCopy => {
            let config = AppConfig::load(paths, &overrides).await?;
            notify::run(&config).await?;
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_logging(command: &Commands) {
    let default = match command {
        Commands::Daemon => "info",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory for tmux-buffer-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "tmux-buffer-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
