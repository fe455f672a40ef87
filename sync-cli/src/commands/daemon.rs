//! Daemon command - run the scheduler and the control socket.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

use bufsync_client::{scheduler, LocalBufferSource, RemoteStore, SchedulerHandle, SyncEngine};
use bufsync_types::Namespace;

use super::build_engine;
use crate::config::AppConfig;
use crate::control::ControlServer;

/// Run the daemon until `stop`, SIGINT, or SIGTERM.
pub async fn run(config: &AppConfig) -> Result<()> {
    let namespace = config.sync.namespace()?;
    let engine = Arc::new(build_engine(config).await?);
    let server_id = engine.server_id().to_string();

    let shutdown = Arc::new(Notify::new());
    let (server, handle) = start(
        &config.paths.socket(),
        Arc::clone(&engine),
        namespace.clone(),
        Arc::clone(&shutdown),
    )
    .await?;

    tracing::info!(
        namespace = %namespace,
        "Daemon started (server {}, count {}, every {}s)",
        &server_id[..16],
        config.sync.sync_count,
        config.sync.sync_frequency
    );

    let mut server_task = tokio::spawn(server.run(handle.clone()));
    tokio::select! {
        _ = &mut server_task => {
            tracing::info!("Stop requested");
        }
        result = wait_for_signal() => {
            result?;
            tracing::info!("Signal received, shutting down");
            shutdown.notify_one();
            server_task.await.context("Control server task failed")?;
        }
    }

    handle.shutdown().await;
    tracing::info!("Daemon stopped");
    Ok(())
}

/// Claim the control socket, then start the scheduler.
///
/// The scheduler syncs as soon as it starts, so a daemon refused by the
/// socket never touches the store or the state file.
async fn start<L, R>(
    socket: &Path,
    engine: Arc<SyncEngine<L, R>>,
    namespace: Namespace,
    shutdown: Arc<Notify>,
) -> Result<(ControlServer<L, R>, SchedulerHandle)>
where
    L: LocalBufferSource + 'static,
    R: RemoteStore + 'static,
{
    let server = ControlServer::bind(socket, Arc::clone(&engine), shutdown).await?;
    let handle = scheduler::spawn(engine, namespace);
    Ok((server, handle))
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C"),
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")
    }
}
