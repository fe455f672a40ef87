//! Remote store abstraction for tmux-buffer-sync.
//!
//! This module provides a pluggable layer over the shared key-value store
//! that carries buffers between servers (atuin's kv store, or in-memory for
//! testing).
//!
//! # Design
//!
//! The store trait is async and namespace-scoped:
//! - `put()` writes a value under a key
//! - `get()` reads a value, `None` if absent
//! - `list()` returns every key with its ordering metadata
//! - `delete()` removes a key, reporting whether it was still there
//! - `refresh()` / `flush()` exchange changes with the store's own
//!   replication, and default to no-ops
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! store.put(&ns, "key", "value").await?;
//! let keys = store.list(&ns).await?;
//! ```

mod atuin;
mod memory;

pub use atuin::AtuinStore;
pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use bufsync_types::{Namespace, RemoteKey};

/// Remote store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The store could not be reached.
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    /// The store rejected a command.
    #[error("remote store command failed: {0}")]
    CommandFailed(String),

    /// A call did not complete in time.
    #[error("remote store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Shared key-value store holding the namespaces.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.
    async fn put(&self, namespace: &Namespace, key: &str, value: &str)
        -> Result<(), TransportError>;

    /// Read the value under `key`.
    async fn get(&self, namespace: &Namespace, key: &str)
        -> Result<Option<String>, TransportError>;

    /// Every key in the namespace with its ordering metadata.
    async fn list(&self, namespace: &Namespace) -> Result<Vec<RemoteKey>, TransportError>;

    /// Remove `key`. Returns `false` if it was already gone.
    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool, TransportError>;

    /// Fetch changes made by other servers.
    async fn refresh(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Publish local changes to other servers.
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
