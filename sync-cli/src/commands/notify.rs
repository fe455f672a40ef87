//! Notify-copy command - called from the tmux copy hook.

use anyhow::Result;

use bufsync_types::{Request, Response};

use super::build_engine;
use crate::config::AppConfig;
use crate::control;

/// Run the notify-copy command.
///
/// With a daemon, hands the event to its debouncer and returns at once.
/// Without one, pushes in-process.
pub async fn run(config: &AppConfig) -> Result<()> {
    match control::request(&config.paths.socket(), &Request::BufferChanged).await? {
        Some(Response::Accepted) => Ok(()),
        Some(Response::Failed { error }) => anyhow::bail!("Daemon rejected copy event: {}", error),
        Some(other) => anyhow::bail!("Unexpected daemon response: {:?}", other),
        None => {
            let namespace = config.sync.namespace()?;
            let engine = build_engine(config).await?;
            let report = engine
                .on_buffer_change(&namespace, config.sync.sync_count)
                .await
                .map_err(|e| anyhow::anyhow!("Push failed: {}", e))?;
            tracing::info!("Pushed {}, evicted {}", report.pushed, report.evicted);
            Ok(())
        }
    }
}
