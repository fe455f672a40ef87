//! Status reporting.
//!
//! [`report`] assembles a [`Status`] from a state snapshot; [`render`] turns
//! it into the text printed by `sync-status`. Neither performs I/O.

use bufsync_core::SyncState;
use bufsync_types::{ServerId, Status};

use crate::config::SyncConfig;

/// Build a status view of `state` for `namespace`.
pub fn report(
    state: &SyncState,
    config: &SyncConfig,
    namespace: &str,
    server_id: Option<ServerId>,
) -> Status {
    Status {
        server_id,
        namespace: namespace.to_string(),
        count: config.sync_count,
        frequency_secs: config.sync_frequency,
        last_push_at: state.last_push_at,
        last_pull_at: state.last_pull_at,
        last_error: state.last_error.clone(),
        local_buffer_count: state.local_buffer_count,
        known_remote_count: state.known_count(namespace),
    }
}

/// Render a status as human-readable text, with times relative to `now`
/// (unix millis).
pub fn render(status: &Status, now: u64) -> String {
    let server = status
        .server_id
        .map(|id| id.to_string()[..16].to_string())
        .unwrap_or_else(|| "NOT INITIALIZED".to_string());

    let mut out = String::new();
    out.push_str("=== tmux-buffer-sync status ===\n");
    out.push_str(&format!("Server:      {}\n", server));
    out.push_str(&format!("Namespace:   {}\n", status.namespace));
    out.push_str(&format!("Count:       {}\n", status.count));
    out.push_str(&format!("Frequency:   {}s\n", status.frequency_secs));
    out.push_str(&format!(
        "Last push:   {}\n",
        format_timestamp(status.last_push_at, now)
    ));
    out.push_str(&format!(
        "Last pull:   {}\n",
        format_timestamp(status.last_pull_at, now)
    ));
    out.push_str(&format!("Local:       {} buffers\n", status.local_buffer_count));
    out.push_str(&format!("Remote:      {} known entries\n", status.known_remote_count));
    out.push_str(&format!(
        "Last error:  {}\n",
        status.last_error.as_deref().unwrap_or("none")
    ));
    out
}

/// Format a unix-millis timestamp relative to `now`.
pub fn format_timestamp(ts: Option<u64>, now: u64) -> String {
    let Some(ts) = ts else {
        return "never".to_string();
    };

    let diff = now.saturating_sub(ts) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
