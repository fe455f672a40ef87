//! Stop command - ask the daemon to shut down.

use anyhow::Result;
use std::time::Duration;

use bufsync_types::{Request, Response};

use crate::config::Paths;
use crate::control;

/// How long to wait for the daemon to finish its in-flight sync.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the stop command.
pub async fn run(paths: &Paths) -> Result<()> {
    let socket = paths.socket();
    match control::request(&socket, &Request::Shutdown).await? {
        Some(Response::Accepted) => {}
        Some(other) => anyhow::bail!("Unexpected daemon response: {:?}", other),
        None => {
            println!("No daemon running.");
            return Ok(());
        }
    }

    // The daemon removes its socket once the control server has stopped.
    let waited = tokio::time::timeout(STOP_TIMEOUT, async {
        while socket.exists() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    match waited {
        Ok(()) => println!("Daemon stopped."),
        Err(_) => println!("Stop requested; daemon is still finishing a sync."),
    }
    Ok(())
}
