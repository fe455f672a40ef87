//! atuin kv store via the atuin CLI.
//!
//! Keys live in `atuin kv` under the namespace; `atuin sync` replicates them
//! between servers. With `auto_sync` on, `refresh()` and `flush()` run
//! `atuin sync` so a pull sees other servers' writes and a push is published
//! right away instead of at atuin's next own sync.

use async_trait::async_trait;
use std::ffi::OsString;

use bufsync_types::{peek_meta, Namespace, RemoteKey};

use super::{RemoteStore, TransportError};
use crate::process;

/// Remote store backed by `atuin kv`.
#[derive(Debug, Clone)]
pub struct AtuinStore {
    bin: OsString,
    auto_sync: bool,
}

impl AtuinStore {
    /// Use `atuin` from `PATH`, with `atuin sync` around each operation.
    pub fn new() -> Self {
        Self {
            bin: OsString::from("atuin"),
            auto_sync: true,
        }
    }

    /// Use a specific atuin binary.
    pub fn with_bin(mut self, bin: impl Into<OsString>) -> Self {
        self.bin = bin.into();
        self
    }

    /// Whether `refresh()`/`flush()` run `atuin sync`.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    async fn atuin(&self, args: &[&str]) -> Result<String, TransportError> {
        let command = format!("atuin {}", args.iter().take(2).copied().collect::<Vec<_>>().join(" "));
        let output = process::run(&self.bin, args, None)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{command}: {e}")))?;

        if !output.status.success() {
            return Err(TransportError::CommandFailed(format!(
                "{command}: {}",
                process::failure_message(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn sync(&self) -> Result<(), TransportError> {
        if !self.auto_sync {
            return Ok(());
        }
        // A failed `atuin sync` almost always means the sync server is
        // out of reach.
        self.atuin(&["sync"]).await.map(|_| ()).map_err(|e| match e {
            TransportError::CommandFailed(msg) => TransportError::Unreachable(msg),
            other => other,
        })
    }
}

/// Entry keys are base64url and may start with `-`, so flag values are
/// attached with `=` and positionals follow `--`.
fn namespace_arg(namespace: &Namespace) -> String {
    format!("--namespace={}", namespace.as_str())
}

impl Default for AtuinStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for AtuinStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &str,
    ) -> Result<(), TransportError> {
        let namespace = namespace_arg(namespace);
        let key = format!("--key={key}");
        self.atuin(&["kv", "set", &namespace, &key, "--", value])
            .await
            .map(|_| ())
    }

    async fn get(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Option<String>, TransportError> {
        let stdout = self
            .atuin(&["kv", "get", &namespace_arg(namespace), "--", key])
            .await?;
        let value = stdout.trim_end_matches(['\n', '\r']);
        Ok(if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        })
    }

    async fn list(&self, namespace: &Namespace) -> Result<Vec<RemoteKey>, TransportError> {
        let stdout = self
            .atuin(&["kv", "list", &namespace_arg(namespace)])
            .await?;

        let mut keys = Vec::new();
        for key in stdout.lines().map(str::trim).filter(|k| !k.is_empty()) {
            // atuin only lists keys; ordering metadata lives in the value.
            match self.get(namespace, key).await? {
                Some(value) => keys.push(RemoteKey::new(key, peek_meta(&value))),
                None => tracing::debug!("Key {} vanished while listing", key),
            }
        }
        Ok(keys)
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool, TransportError> {
        if self.get(namespace, key).await?.is_none() {
            return Ok(false);
        }
        self.atuin(&["kv", "delete", &namespace_arg(namespace), "--", key])
            .await?;
        Ok(true)
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        self.sync().await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.sync().await
    }
}
