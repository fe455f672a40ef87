//! The state file: [`SyncState`] persisted as JSON.
//!
//! Written atomically (temp file + rename) with owner-only permissions, since
//! the ledger records which buffers exist on this server.

use std::path::{Path, PathBuf};
use thiserror::Error;

use bufsync_core::SyncState;

/// State file errors.
#[derive(Debug, Error)]
pub enum StateFileError {
    /// Reading or writing the file failed.
    #[error("state file {path}: {source}")]
    Io {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file exists but is not valid state.
    #[error("invalid state file {path}: {source}")]
    Parse {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Location of a state file.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// File name inside the data directory.
    pub const FILE_NAME: &'static str = "state.json";

    /// State file at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file inside a data directory.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(Self::FILE_NAME))
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state. A missing file is empty state.
    pub async fn load(&self) -> Result<SyncState, StateFileError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SyncState::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&contents).map_err(|e| StateFileError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Save state atomically.
    pub async fn save(&self, state: &SyncState) -> Result<(), StateFileError> {
        let contents = serde_json::to_string_pretty(state).map_err(|e| StateFileError::Parse {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| self.io_error(e))?;
        set_file_permissions_0600(&tmp)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> StateFileError {
        StateFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
