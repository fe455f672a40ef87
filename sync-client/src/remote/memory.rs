//! In-memory remote store for testing.
//!
//! Several engines can share one `MemoryStore` (clones share state) to play
//! the part of independent servers syncing through the same store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bufsync_types::{peek_meta, Namespace, RemoteKey};

use super::{RemoteStore, TransportError};

/// Store operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `put()`
    Put,
    /// `get()`
    Get,
    /// `list()`
    List,
    /// `delete()`
    Delete,
    /// `refresh()`
    Refresh,
    /// `flush()`
    Flush,
}

/// In-memory remote store for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    namespaces: HashMap<String, BTreeMap<String, String>>,
    unreachable: bool,
    latency: Option<Duration>,
    racing_evictor: bool,
    /// (op, calls to let through first, error)
    failures: Vec<(StoreOp, usize, TransportError)>,
    calls: HashMap<StoreOp, usize>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a raw value, bypassing failure injection.
    pub fn insert_raw(&self, namespace: &str, key: &str, value: &str) {
        self.inner()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Remove a raw value, bypassing failure injection.
    pub fn remove_raw(&self, namespace: &str, key: &str) {
        if let Some(ns) = self.inner().namespaces.get_mut(namespace) {
            ns.remove(key);
        }
    }

    /// Raw value under a key.
    pub fn value(&self, namespace: &str, key: &str) -> Option<String> {
        self.inner()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned())
    }

    /// Keys of a namespace, sorted.
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        self.inner()
            .namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every call fail with [`TransportError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner().unreachable = unreachable;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner().latency = latency;
    }

    /// Simulate another server evicting concurrently: `delete()` still
    /// removes the key but reports it as already gone.
    pub fn set_racing_evictor(&self, racing: bool) {
        self.inner().racing_evictor = racing;
    }

    /// Cause the next `op` to fail with `error`.
    pub fn fail_next(&self, op: StoreOp, error: TransportError) {
        self.fail_after(op, 0, error);
    }

    /// Let `skip` calls of `op` through, then fail the next one with `error`.
    pub fn fail_after(&self, op: StoreOp, skip: usize, error: TransportError) {
        self.inner().failures.push((op, skip, error));
    }

    /// Number of completed or failed calls of `op`.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.inner().calls.get(&op).copied().unwrap_or(0)
    }

    /// Count the call, apply injected failures, then wait out the latency.
    async fn enter(&self, op: StoreOp) -> Result<(), TransportError> {
        let latency = {
            let mut inner = self.inner();
            *inner.calls.entry(op).or_default() += 1;
            if inner.unreachable {
                return Err(TransportError::Unreachable("connection refused".into()));
            }
            if let Some(pos) = inner.failures.iter().position(|(o, _, _)| *o == op) {
                if inner.failures[pos].1 == 0 {
                    let (_, _, error) = inner.failures.remove(pos);
                    return Err(error);
                }
                inner.failures[pos].1 -= 1;
            }
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &str,
    ) -> Result<(), TransportError> {
        self.enter(StoreOp::Put).await?;
        self.insert_raw(namespace.as_str(), key, value);
        Ok(())
    }

    async fn get(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Option<String>, TransportError> {
        self.enter(StoreOp::Get).await?;
        Ok(self.value(namespace.as_str(), key))
    }

    async fn list(&self, namespace: &Namespace) -> Result<Vec<RemoteKey>, TransportError> {
        self.enter(StoreOp::List).await?;
        let inner = self.inner();
        Ok(inner
            .namespaces
            .get(namespace.as_str())
            .map(|ns| {
                ns.iter()
                    .map(|(k, v)| RemoteKey::new(k.clone(), peek_meta(v)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool, TransportError> {
        self.enter(StoreOp::Delete).await?;
        let mut inner = self.inner();
        let racing = inner.racing_evictor;
        let removed = inner
            .namespaces
            .get_mut(namespace.as_str())
            .and_then(|ns| ns.remove(key))
            .is_some();
        Ok(removed && !racing)
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        self.enter(StoreOp::Refresh).await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.enter(StoreOp::Flush).await
    }
}
