//! Initialize server identity and default settings.

use anyhow::{Context, Result};

use crate::config::{default_settings_toml, Paths, ServerIdentity};

/// Run the init command.
pub async fn run(paths: &Paths) -> Result<()> {
    if ServerIdentity::exists(paths) {
        anyhow::bail!(
            "Server already initialized. Delete {} to reinitialize.",
            paths.server_file().display()
        );
    }

    let identity = ServerIdentity::new();
    identity.save(paths).await?;

    let config_file = paths.config_file();
    let wrote_config = if config_file.exists() {
        false
    } else {
        tokio::fs::write(config_file, default_settings_toml()?)
            .await
            .context("Failed to write default settings")?;
        true
    };

    println!("Server initialized successfully!");
    println!();
    println!("  Server ID: {}", &identity.server_id[..16]);
    println!("  Data dir:  {}", paths.data_dir().display());
    if wrote_config {
        println!("  Settings:  {} (defaults)", config_file.display());
    }
    println!();
    println!("Add to ~/.tmux.conf:");
    println!();
    println!("  run-shell -b 'tmux-buffer-sync daemon'");
    println!("  set-hook -g paste-buffer-changed 'run-shell -b \"tmux-buffer-sync notify-copy\"'");
    println!();
    println!("Optional overrides:");
    println!("  set -g @buffer-sync-count 5");
    println!("  set -g @buffer-sync-frequency 60");
    println!("  set -g @buffer-sync-namespace tmux-buffer-sync");

    Ok(())
}
