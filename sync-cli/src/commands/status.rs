//! Show sync status.

use anyhow::Result;

use bufsync_client::status;
use bufsync_core::SyncState;
use bufsync_types::{now_millis, Request, Response, Status};

use crate::config::{AppConfig, ServerIdentity};
use crate::control;

/// Run the sync-status command. Never fails: problems are shown as status.
pub async fn run(config: &AppConfig) -> Result<()> {
    let (status, source) = match daemon_status(config).await {
        Some(status) => (status, "daemon"),
        None => (saved_status(config).await, "state file"),
    };

    print!("{}", status::render(&status, now_millis()));
    println!("Source:      {}", source);
    Ok(())
}

async fn daemon_status(config: &AppConfig) -> Option<Status> {
    match control::request(&config.paths.socket(), &Request::Status).await {
        Ok(Some(Response::Status { status })) => Some(status),
        Ok(Some(other)) => {
            tracing::warn!("Unexpected daemon response: {:?}", other);
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Could not query daemon: {:#}", e);
            None
        }
    }
}

/// Status from `state.json`, without touching tmux or atuin.
async fn saved_status(config: &AppConfig) -> Status {
    let state = match config.paths.state_file().load().await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!("{}", e);
            SyncState::new()
        }
    };
    let server_id = match ServerIdentity::load(&config.paths).await {
        Ok(identity) => identity.id().ok(),
        Err(_) => None,
    };
    status::report(&state, &config.sync, &config.sync.sync_namespace, server_id)
}
