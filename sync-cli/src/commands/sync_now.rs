//! Sync-now command - pull then push, via the daemon if one is running.

use anyhow::Result;

use bufsync_types::{Request, Response};

use super::{build_engine, summarize};
use crate::config::AppConfig;
use crate::control;

/// Run the sync-now command.
pub async fn run(config: &AppConfig) -> Result<()> {
    match control::request(&config.paths.socket(), &Request::SyncNow).await? {
        Some(Response::Synced { report }) => {
            println!("{}", summarize(&report));
            Ok(())
        }
        Some(Response::Failed { error }) => anyhow::bail!("Sync failed: {}", error),
        Some(other) => anyhow::bail!("Unexpected daemon response: {:?}", other),
        None => {
            tracing::debug!("No daemon running, syncing in-process");
            let namespace = config.sync.namespace()?;
            let engine = build_engine(config).await?;
            let report = engine
                .sync_now(&namespace, config.sync.sync_count)
                .await
                .map_err(|e| anyhow::anyhow!("Sync failed: {}", e))?;
            println!("{}", summarize(&report));
            Ok(())
        }
    }
}
