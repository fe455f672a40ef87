//! Daemon control protocol and sync reports.
//!
//! Requests and responses travel as one JSON object per line over the
//! daemon's control socket.

use serde::{Deserialize, Serialize};

use crate::ServerId;

/// A request sent to a running daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Run a full pull-then-push now
    SyncNow,
    /// Report current status
    Status,
    /// A local copy happened (debounced push)
    BufferChanged,
    /// Stop the daemon after the in-flight operation
    Shutdown,
}

/// The daemon's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// A sync completed
    Synced {
        /// What the sync did
        report: SyncReport,
    },
    /// Current status
    Status {
        /// Status snapshot
        status: Status,
    },
    /// Request accepted, nothing to report yet
    Accepted,
    /// The request failed
    Failed {
        /// Human-readable error
        error: String,
    },
}

impl Request {
    /// Encode as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode from a line (trailing newline optional).
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

impl Response {
    /// Encode as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode from a line (trailing newline optional).
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

/// Outcome of a pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    /// Entries loaded into local buffers
    pub pulled: usize,
    /// Selected entries that were already local
    pub already_present: usize,
    /// Entries skipped because they could not be decoded
    pub skipped_corrupt: usize,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// Entries written to the namespace
    pub pushed: usize,
    /// Entries deleted to enforce the retention bound
    pub evicted: usize,
    /// Entries left local because their encoded value is too large to store
    #[serde(default)]
    pub skipped_oversize: usize,
}

/// Outcome of a pull followed by a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// The pull half
    pub pull: PullReport,
    /// The push half
    pub push: PushReport,
}

/// Read-only view of sync state, as rendered by `sync-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// This server's identity
    pub server_id: Option<ServerId>,
    /// Namespace being synchronized
    pub namespace: String,
    /// Retention bound and batch size
    pub count: usize,
    /// Seconds between periodic syncs
    pub frequency_secs: u64,
    /// Unix millis of the last successful push
    pub last_push_at: Option<u64>,
    /// Unix millis of the last successful pull
    pub last_pull_at: Option<u64>,
    /// Last recorded error, cleared by the next successful operation
    pub last_error: Option<String>,
    /// Local buffers observed at the last sync
    pub local_buffer_count: usize,
    /// Entries known to exist in the namespace
    pub known_remote_count: usize,
}
