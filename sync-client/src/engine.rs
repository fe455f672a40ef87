//! SyncEngine - push, pull and merge of copy buffers.
//!
//! This module provides [`SyncEngine`], the only component that talks to both
//! the local buffer source and the remote store.
//!
//! # Architecture
//!
//! The engine uses pure policy from sync-core (ledger, retention, backoff)
//! and performs the I/O through the [`LocalBufferSource`] and
//! [`RemoteStore`] traits.
//!
//! ```text
//! Scheduler / CLI → SyncEngine → RemoteStore → atuin kv
//!                       ↓    ↘
//!            sync-core        LocalBufferSource → tmux
//! ```
//!
//! # Single-flight
//!
//! Every operation holds the namespace's async mutex for its whole duration,
//! so at most one push/pull/sync runs per namespace per process. Shared state
//! is written in short sections under that lock and never held across a
//! remote or local call.
//!
//! # Example
//!
//! ```ignore
//! let engine = SyncEngine::new(server_id, config, TmuxBuffers::new(), AtuinStore::new());
//! let report = engine.sync_now(&namespace, 5).await?;
//! ```

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use bufsync_core::{
    plan_eviction, pulled_name, select_for_pull, select_for_push, Backoff, SyncState,
    TrackedBuffer,
};
use bufsync_types::{
    decode, encode, now_millis, CodecError, EntryId, Namespace, PullReport,
    PushReport, ServerId, Status, SyncReport,
};

use crate::config::SyncConfig;
use crate::local::{LocalBufferError, LocalBufferSource};
use crate::persist::StateFile;
use crate::remote::{RemoteStore, TransportError};
use crate::status;

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote store failed; the batch was aborted.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The terminal multiplexer failed; the batch was aborted.
    #[error("local buffers unavailable: {0}")]
    LocalBufferUnavailable(#[from] LocalBufferError),

    /// An entry could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// The sync engine.
///
/// Owns the sync state of one server and drives push/pull against one
/// remote store.
pub struct SyncEngine<L: LocalBufferSource, R: RemoteStore> {
    server_id: ServerId,
    config: SyncConfig,
    local: L,
    remote: R,
    state: RwLock<SyncState>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    state_file: Option<StateFile>,
}

impl<L: LocalBufferSource, R: RemoteStore> SyncEngine<L, R> {
    /// Create an engine with empty state.
    pub fn new(server_id: ServerId, config: SyncConfig, local: L, remote: R) -> Self {
        Self {
            server_id,
            config,
            local,
            remote,
            state: RwLock::new(SyncState::new()),
            locks: DashMap::new(),
            state_file: None,
        }
    }

    /// Start from previously saved state.
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.state = RwLock::new(state);
        self
    }

    /// Save state to `file` after every operation.
    pub fn with_state_file(mut self, file: StateFile) -> Self {
        self.state_file = Some(file);
        self
    }

    /// This server's identity.
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local buffer source.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// The remote store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// Status of the configured namespace. No I/O.
    pub async fn status(&self) -> Status {
        let state = self.state.read().await;
        status::report(
            &state,
            &self.config,
            &self.config.sync_namespace,
            Some(self.server_id),
        )
    }

    /// Push local copies not yet in `namespace`.
    pub async fn push(&self, namespace: &Namespace, count: usize) -> Result<PushReport, SyncError> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;

        let result = self.push_locked(namespace, count).await;
        self.finish("push", namespace, result).await
    }

    /// Pull entries from `namespace` into local buffers.
    pub async fn pull(&self, namespace: &Namespace, count: usize) -> Result<PullReport, SyncError> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;

        let result = self.pull_locked(namespace, count).await;
        self.finish("pull", namespace, result).await
    }

    /// Pull then push, as one critical section.
    pub async fn sync_now(
        &self,
        namespace: &Namespace,
        count: usize,
    ) -> Result<SyncReport, SyncError> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;

        let result = async {
            let pull = self.pull_locked(namespace, count).await?;
            let push = self.push_locked(namespace, count).await?;
            Ok(SyncReport { pull, push })
        }
        .await;
        self.finish("sync", namespace, result).await
    }

    /// React to a local copy: push unless there are no local buffers.
    pub async fn on_buffer_change(
        &self,
        namespace: &Namespace,
        count: usize,
    ) -> Result<PushReport, SyncError> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;

        let result = async {
            if self.local.show_latest().await?.is_none() {
                tracing::debug!("No local buffers, nothing to push");
                return Ok(PushReport::default());
            }
            self.push_locked(namespace, count).await
        }
        .await;
        self.finish("push", namespace, result).await
    }

    fn namespace_lock(&self, namespace: &Namespace) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace.as_str().to_string())
            .or_default()
            .clone()
    }

    /// Record a failure, persist state, hand the result back.
    async fn finish<T>(
        &self,
        op: &str,
        namespace: &Namespace,
        result: Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        if let Err(e) = &result {
            tracing::warn!(namespace = %namespace, "{} failed: {}", op, e);
            self.state.write().await.record_error(e.to_string());
        }

        if let Some(file) = &self.state_file {
            let snapshot = self.snapshot().await;
            if let Err(e) = file.save(&snapshot).await {
                tracing::warn!("Failed to save state: {}", e);
            }
        }

        result
    }

    /// List local buffers and match them against the ledger.
    async fn reconcile_local(&self, count: usize) -> Result<Vec<TrackedBuffer>, SyncError> {
        let listing = self.local.list_recent(count).await?;
        let now = now_millis();

        let mut state = self.state.write().await;
        let SyncState {
            ledger,
            local_sequence_counter,
            local_buffer_count,
            ..
        } = &mut *state;
        *local_buffer_count = listing.buffers.len();
        Ok(ledger.reconcile(
            &listing.buffers,
            listing.complete,
            self.server_id,
            local_sequence_counter,
            now,
        ))
    }

    async fn push_locked(
        &self,
        namespace: &Namespace,
        count: usize,
    ) -> Result<PushReport, SyncError> {
        let tracked = self.reconcile_local(count).await?;
        let to_push = {
            let state = self.state.read().await;
            select_for_push(&tracked, count, &self.server_id, |id| {
                state.is_known(namespace.as_str(), id)
            })
        };

        let mut report = PushReport::default();
        let mut written: Vec<EntryId> = Vec::with_capacity(to_push.len());

        for entry in &to_push {
            let key = entry.id.to_string();
            let value = encode(entry)?;
            if value.len() > self.config.max_value_bytes {
                tracing::warn!(
                    namespace = %namespace,
                    key = %key,
                    "Not pushing entry: {} bytes encoded, limit is {}",
                    value.len(),
                    self.config.max_value_bytes
                );
                report.skipped_oversize += 1;
                continue;
            }
            self.call("put", || self.remote.put(namespace, &key, &value))
                .await?;
            tracing::debug!(namespace = %namespace, key = %key, "Pushed entry");
            written.push(entry.id);
        }

        if !written.is_empty() {
            let keys = self.call("list", || self.remote.list(namespace)).await?;
            for victim in plan_eviction(&keys, self.config.sync_count) {
                let removed = self
                    .call("delete", || self.remote.delete(namespace, &victim.key))
                    .await?;
                if removed {
                    report.evicted += 1;
                } else {
                    tracing::debug!(
                        namespace = %namespace,
                        key = %victim.key,
                        "Eviction target already removed by another server"
                    );
                }
            }
            self.call("flush", || self.remote.flush()).await?;
        }

        report.pushed = written.len();
        {
            let mut state = self.state.write().await;
            state.mark_known(namespace.as_str(), written);
            state.record_push(now_millis());
        }

        if report.pushed > 0 || report.evicted > 0 || report.skipped_oversize > 0 {
            tracing::info!(
                namespace = %namespace,
                "Push: {} written, {} evicted, {} too large",
                report.pushed,
                report.evicted,
                report.skipped_oversize
            );
        }
        Ok(report)
    }

    async fn pull_locked(
        &self,
        namespace: &Namespace,
        count: usize,
    ) -> Result<PullReport, SyncError> {
        self.call("refresh", || self.remote.refresh()).await?;
        let keys = self.call("list", || self.remote.list(namespace)).await?;
        self.reconcile_local(count).await?;

        let mut report = PullReport::default();
        let mut pulled: Vec<EntryId> = Vec::new();

        // Oldest first, so the newest entry ends up on top of the stack.
        for remote_key in select_for_pull(&keys, count).iter().rev() {
            let id: EntryId = match remote_key.key.parse() {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(
                        namespace = %namespace,
                        key = %remote_key.key,
                        "Skipping corrupt entry: key is not an entry id ({})",
                        e
                    );
                    report.skipped_corrupt += 1;
                    continue;
                }
            };

            if self.state.read().await.ledger.contains_id(&id) {
                report.already_present += 1;
                continue;
            }

            let value = match self
                .call("get", || self.remote.get(namespace, &remote_key.key))
                .await?
            {
                Some(value) => value,
                None => {
                    tracing::debug!(key = %remote_key.key, "Entry vanished before it could be read");
                    continue;
                }
            };

            let entry = match decode(&value) {
                Ok(entry) if entry.id == id => entry,
                Ok(entry) => {
                    tracing::warn!(
                        namespace = %namespace,
                        key = %remote_key.key,
                        "Skipping corrupt entry: stored under a different id ({})",
                        entry.id
                    );
                    report.skipped_corrupt += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        namespace = %namespace,
                        key = %remote_key.key,
                        "Skipping corrupt entry: {}",
                        e
                    );
                    report.skipped_corrupt += 1;
                    continue;
                }
            };

            self.local
                .load(&pulled_name(&entry.id), &entry.content)
                .await?;
            self.state.write().await.ledger.record_pulled(&entry);
            pulled.push(entry.id);
            report.pulled += 1;
        }

        {
            let mut state = self.state.write().await;
            let listed: BTreeSet<EntryId> =
                keys.iter().filter_map(|k| k.key.parse().ok()).collect();
            let local: BTreeSet<EntryId> = state.ledger.ids().copied().collect();

            let present = listed.intersection(&local).copied();
            state.mark_known(namespace.as_str(), pulled.into_iter().chain(present));
            state.retain_known(namespace.as_str(), |id| {
                listed.contains(id) || local.contains(id)
            });
            state.record_pull(now_millis());
        }

        if report.pulled > 0 || report.skipped_corrupt > 0 {
            tracing::info!(
                namespace = %namespace,
                "Pull: {} loaded, {} already present, {} corrupt",
                report.pulled,
                report.already_present,
                report.skipped_corrupt
            );
        }
        Ok(report)
    }

    /// Run a remote call with a timeout, retrying with backoff.
    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let timeout = self.config.remote_timeout();
        let mut backoff = Backoff::new(self.config.retry_base());

        loop {
            let result = match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if backoff.attempt() < self.config.max_retries => {
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        attempt = backoff.attempt(),
                        "{} failed ({}), retrying in {:?}",
                        op,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryBuffers;
    use crate::remote::{MemoryStore, StoreOp};
    use bufsync_types::{BufferEntry, Sequence};
    use std::time::Duration;

    type TestEngine = SyncEngine<MemoryBuffers, MemoryStore>;

    fn config() -> SyncConfig {
        SyncConfig::default().with_retries(0, 1)
    }

    fn engine(store: &MemoryStore) -> (TestEngine, MemoryBuffers) {
        engine_with(store, config())
    }

    fn engine_with(store: &MemoryStore, config: SyncConfig) -> (TestEngine, MemoryBuffers) {
        let buffers = MemoryBuffers::new();
        let engine = SyncEngine::new(ServerId::random(), config, buffers.clone(), store.clone());
        (engine, buffers)
    }

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    fn remote_entry(content: &str, seq: u64, captured_at: u64) -> BufferEntry {
        BufferEntry::new(ServerId::random(), Sequence::new(seq), content.into(), captured_at)
    }

    fn insert(store: &MemoryStore, namespace: &str, entry: &BufferEntry) {
        store.insert_raw(namespace, &entry.id.to_string(), &encode(entry).unwrap());
    }

    // ===========================================
    // Push
    // ===========================================

    #[tokio::test]
    async fn push_writes_local_copies() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("one");
        buffers.copy("two");

        let report = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(store.keys("ns1").len(), 2);

        let state = a.snapshot().await;
        assert!(state.last_push_at.is_some());
        assert_eq!(state.known_count("ns1"), 2);
        assert_eq!(state.local_sequence_counter, Sequence::new(2));
    }

    #[tokio::test]
    async fn push_is_idempotent() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");

        a.push(&ns("ns1"), 5).await.unwrap();
        let second = a.push(&ns("ns1"), 5).await.unwrap();

        assert_eq!(second.pushed, 0);
        assert_eq!(store.keys("ns1").len(), 1);
        assert_eq!(store.calls(StoreOp::Put), 1);
    }

    #[tokio::test]
    async fn pushed_value_decodes_with_origin() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");
        a.push(&ns("ns1"), 5).await.unwrap();

        let key = &store.keys("ns1")[0];
        let entry = decode(&store.value("ns1", key).unwrap()).unwrap();
        assert_eq!(entry.content, "hello");
        assert_eq!(entry.origin, a.server_id());
        assert_eq!(entry.sequence, Sequence::new(1));
        assert_eq!(&entry.id.to_string(), key);
    }

    #[tokio::test]
    async fn push_with_nothing_new_skips_store() {
        let store = MemoryStore::new();
        let (a, _buffers) = engine(&store);

        let report = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report, PushReport::default());
        assert_eq!(store.calls(StoreOp::List), 0);
        assert_eq!(store.calls(StoreOp::Flush), 0);
        assert!(a.snapshot().await.last_push_at.is_some());
    }

    #[tokio::test]
    async fn oversize_copy_stays_local_without_blocking_later_copies() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy(&"x".repeat(200 * 1024));

        let first = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(first.pushed, 0);
        assert_eq!(first.skipped_oversize, 1);
        assert_eq!(store.calls(StoreOp::Put), 0);

        buffers.copy("small");
        let second = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(second.pushed, 1);
        assert_eq!(second.skipped_oversize, 1);
        assert_eq!(store.keys("ns1").len(), 1);
        assert!(a.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn value_limit_is_configurable() {
        let store = MemoryStore::new();
        let (a, buffers) = engine_with(&store, config().with_max_value_bytes(64));
        buffers.copy(&"y".repeat(100));

        let report = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.skipped_oversize, 1);
        assert!(store.keys("ns1").is_empty());
    }

    #[tokio::test]
    async fn retention_bound_evicts_oldest() {
        // ns2 holds five entries captured at 1..5; pushing a sixth evicts captured_at=1.
        let store = MemoryStore::new();
        let existing: Vec<_> = (1..=5).map(|i| remote_entry(&format!("e{i}"), i, i)).collect();
        for entry in &existing {
            insert(&store, "ns2", entry);
        }

        let (a, buffers) = engine(&store);
        buffers.copy("sixth");
        let report = a.push(&ns("ns2"), 5).await.unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(report.evicted, 1);
        let keys = store.keys("ns2");
        assert_eq!(keys.len(), 5);
        assert!(!keys.contains(&existing[0].id.to_string()));
        for entry in &existing[1..] {
            assert!(keys.contains(&entry.id.to_string()));
        }
    }

    #[tokio::test]
    async fn eviction_ties_broken_by_sequence() {
        let store = MemoryStore::new();
        let low = remote_entry("low", 1, 10);
        let high = remote_entry("high", 2, 10);
        insert(&store, "ns1", &low);
        insert(&store, "ns1", &high);

        let (a, buffers) = engine_with(&store, config().with_count(2));
        buffers.copy("new");
        a.push(&ns("ns1"), 2).await.unwrap();

        let keys = store.keys("ns1");
        assert_eq!(keys.len(), 2);
        assert!(!keys.contains(&low.id.to_string()));
        assert!(keys.contains(&high.id.to_string()));
    }

    #[tokio::test]
    async fn retention_conflict_is_not_an_error() {
        let store = MemoryStore::new();
        for i in 1..=5 {
            insert(&store, "ns1", &remote_entry(&format!("e{i}"), i, i));
        }
        store.set_racing_evictor(true);

        let (a, buffers) = engine(&store);
        buffers.copy("sixth");
        let report = a.push(&ns("ns1"), 5).await.unwrap();

        assert_eq!(report.evicted, 0);
        assert_eq!(store.keys("ns1").len(), 5);
        assert!(a.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn push_takes_count_most_recent() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        for i in 0..4 {
            buffers.copy(&format!("b{i}"));
        }

        let report = a.push(&ns("ns1"), 2).await.unwrap();
        assert_eq!(report.pushed, 2);

        let contents: Vec<String> = store
            .keys("ns1")
            .iter()
            .map(|k| decode(&store.value("ns1", k).unwrap()).unwrap().content)
            .collect();
        assert!(contents.contains(&"b3".to_string()));
        assert!(contents.contains(&"b2".to_string()));
    }

    // ===========================================
    // Pull
    // ===========================================

    #[tokio::test]
    async fn pull_loads_remote_entries() {
        let store = MemoryStore::new();
        let entry = remote_entry("hello", 1, 100);
        insert(&store, "ns1", &entry);

        let (b, buffers) = engine(&store);
        let report = b.pull(&ns("ns1"), 5).await.unwrap();

        assert_eq!(report.pulled, 1);
        assert_eq!(buffers.contents(), vec!["hello"]);
        assert_eq!(buffers.buffers()[0].name, pulled_name(&entry.id));

        let state = b.snapshot().await;
        assert!(state.is_known("ns1", &entry.id));
        assert!(state.last_pull_at.is_some());
        assert_eq!(state.local_sequence_counter, Sequence::zero());
    }

    #[tokio::test]
    async fn pull_twice_loads_once() {
        let store = MemoryStore::new();
        insert(&store, "ns1", &remote_entry("hello", 1, 100));

        let (b, buffers) = engine(&store);
        b.pull(&ns("ns1"), 5).await.unwrap();
        let second = b.pull(&ns("ns1"), 5).await.unwrap();

        assert_eq!(second.pulled, 0);
        assert_eq!(second.already_present, 1);
        assert_eq!(buffers.load_count(), 1);
    }

    #[tokio::test]
    async fn merge_is_union_most_recent_first() {
        let store = MemoryStore::new();
        let from_a = [remote_entry("a1", 1, 10), remote_entry("a2", 2, 30)];
        let from_b = [remote_entry("b1", 1, 20), remote_entry("b2", 2, 40)];
        for entry in from_a.iter().chain(from_b.iter()) {
            insert(&store, "ns1", entry);
        }

        let (c, buffers) = engine(&store);
        let report = c.pull(&ns("ns1"), 5).await.unwrap();

        assert_eq!(report.pulled, 4);
        assert_eq!(buffers.contents(), vec!["b2", "a2", "b1", "a1"]);
    }

    #[tokio::test]
    async fn pull_takes_count_most_recent() {
        let store = MemoryStore::new();
        for i in 1..=4 {
            insert(&store, "ns1", &remote_entry(&format!("e{i}"), i, i));
        }

        let (b, buffers) = engine(&store);
        b.pull(&ns("ns1"), 2).await.unwrap();
        assert_eq!(buffers.contents(), vec!["e4", "e3"]);
    }

    #[tokio::test]
    async fn corrupt_entry_is_skipped() {
        // A malformed value in ns3 does not stop the rest of the batch.
        let store = MemoryStore::new();
        let good = [remote_entry("one", 1, 1), remote_entry("two", 2, 2)];
        for entry in &good {
            insert(&store, "ns3", entry);
        }
        let bad_key = remote_entry("bad", 3, 3).id.to_string();
        store.insert_raw("ns3", &bad_key, r#"{"captured_at":3,"garbage":true}"#);

        let (b, buffers) = engine(&store);
        let report = b.pull(&ns("ns3"), 5).await.unwrap();

        assert_eq!(report.pulled, 2);
        assert_eq!(report.skipped_corrupt, 1);
        assert_eq!(buffers.contents(), vec!["two", "one"]);
        assert!(b.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn entry_under_wrong_key_is_corrupt() {
        let store = MemoryStore::new();
        let entry = remote_entry("hello", 1, 1);
        let other_key = remote_entry("other", 1, 1).id.to_string();
        store.insert_raw("ns1", &other_key, &encode(&entry).unwrap());
        store.insert_raw("ns1", "not-an-id", &encode(&entry).unwrap());

        let (b, buffers) = engine(&store);
        let report = b.pull(&ns("ns1"), 5).await.unwrap();

        assert_eq!(report.pulled, 0);
        assert_eq!(report.skipped_corrupt, 2);
        assert!(buffers.contents().is_empty());
    }

    #[tokio::test]
    async fn pull_prunes_forgotten_ids() {
        let store = MemoryStore::new();
        let entry = remote_entry("hello", 1, 1);
        insert(&store, "ns1", &entry);

        let (b, buffers) = engine(&store);
        b.pull(&ns("ns1"), 5).await.unwrap();
        assert_eq!(b.snapshot().await.known_count("ns1"), 1);

        // Evicted remotely and deleted locally.
        store.remove_raw("ns1", &entry.id.to_string());
        buffers.remove(&pulled_name(&entry.id));
        b.pull(&ns("ns1"), 5).await.unwrap();

        assert_eq!(b.snapshot().await.known_count("ns1"), 0);
    }

    // ===========================================
    // Loop Prevention
    // ===========================================

    #[tokio::test]
    async fn pulled_entries_are_never_pushed_back() {
        // A pushes "hello"; B pulls it; B's push must not write it back.
        let store = MemoryStore::new();
        let (a, a_buffers) = engine(&store);
        let (b, b_buffers) = engine(&store);

        a_buffers.copy("hello");
        a.push(&ns("ns1"), 5).await.unwrap();
        let key = store.keys("ns1")[0].clone();

        b.pull(&ns("ns1"), 5).await.unwrap();
        assert_eq!(b_buffers.contents(), vec!["hello"]);

        let puts_before = store.calls(StoreOp::Put);
        let report = b.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(store.calls(StoreOp::Put), puts_before);
        assert_eq!(store.keys("ns1"), vec![key]);
    }

    #[tokio::test]
    async fn pulled_entries_not_pushed_even_after_eviction() {
        let store = MemoryStore::new();
        let entry = remote_entry("hello", 1, 1);
        insert(&store, "ns1", &entry);

        let (b, _buffers) = engine(&store);
        b.pull(&ns("ns1"), 5).await.unwrap();

        // Gone from the namespace, so not "known" any more; origin still differs.
        store.remove_raw("ns1", &entry.id.to_string());
        b.push(&ns("ns1"), 5).await.unwrap();
        assert!(store.keys("ns1").is_empty());
    }

    #[tokio::test]
    async fn skipped_binary_buffer_keeps_older_records() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("a");
        a.push(&ns("ns1"), 2).await.unwrap();
        buffers.copy("b");
        a.push(&ns("ns1"), 2).await.unwrap();

        // The window now shows only "b"; "a" sits just below it.
        let bin = buffers.copy_binary();
        assert_eq!(a.push(&ns("ns1"), 2).await.unwrap().pushed, 0);

        buffers.remove(&bin);
        let report = a.push(&ns("ns1"), 2).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(store.calls(StoreOp::Put), 2);
        assert_eq!(store.keys("ns1").len(), 2);
    }

    #[tokio::test]
    async fn lost_ledger_does_not_claim_pulled_buffers() {
        let store = MemoryStore::new();
        let entry = remote_entry("hello", 1, 1);
        insert(&store, "ns1", &entry);

        let (b, buffers) = engine(&store);
        b.pull(&ns("ns1"), 5).await.unwrap();

        // Same buffers, fresh state (state file lost).
        let fresh = SyncEngine::new(ServerId::random(), config(), buffers.clone(), store.clone());
        store.remove_raw("ns1", &entry.id.to_string());
        let report = fresh.push(&ns("ns1"), 5).await.unwrap();

        assert_eq!(report.pushed, 0);
        assert!(store.keys("ns1").is_empty());
    }

    #[tokio::test]
    async fn two_servers_converge() {
        let store = MemoryStore::new();
        let (a, a_buffers) = engine(&store);
        let (b, b_buffers) = engine(&store);

        a_buffers.copy("from a");
        b_buffers.copy("from b");

        a.sync_now(&ns("ns1"), 5).await.unwrap();
        b.sync_now(&ns("ns1"), 5).await.unwrap();
        a.sync_now(&ns("ns1"), 5).await.unwrap();

        assert_eq!(store.keys("ns1").len(), 2);
        let mut a_contents = a_buffers.contents();
        let mut b_contents = b_buffers.contents();
        a_contents.sort();
        b_contents.sort();
        assert_eq!(a_contents, vec!["from a", "from b"]);
        assert_eq!(a_contents, b_contents);

        // Steady state: nothing moves.
        let report = b.sync_now(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report, SyncReport {
            pull: PullReport { pulled: 0, already_present: 2, skipped_corrupt: 0 },
            push: PushReport::default(),
        });
    }

    // ===========================================
    // Errors
    // ===========================================

    #[tokio::test]
    async fn unreachable_store_records_error() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");
        store.set_unreachable(true);

        let err = a.sync_now(&ns("ns1"), 5).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::Unreachable(_))));

        let status = a.status().await;
        assert!(status.last_error.is_some());
        assert_eq!(status.last_push_at, None);
        assert_eq!(a.snapshot().await.known_count("ns1"), 0);
    }

    #[tokio::test]
    async fn success_clears_last_error() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");

        store.set_unreachable(true);
        assert!(a.push(&ns("ns1"), 5).await.is_err());
        store.set_unreachable(false);
        a.push(&ns("ns1"), 5).await.unwrap();

        assert!(a.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn failed_put_leaves_known_ids_unchanged() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("one");
        buffers.copy("two");
        store.fail_next(StoreOp::Put, TransportError::CommandFailed("disk full".into()));

        assert!(a.push(&ns("ns1"), 5).await.is_err());
        assert_eq!(a.snapshot().await.known_count("ns1"), 0);

        // The retry writes both; the store converges.
        let report = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(store.keys("ns1").len(), 2);
    }

    #[tokio::test]
    async fn partial_pull_keeps_loaded_buffers() {
        let store = MemoryStore::new();
        insert(&store, "ns1", &remote_entry("old", 1, 1));
        insert(&store, "ns1", &remote_entry("new", 2, 2));

        let (b, buffers) = engine(&store);
        buffers.copy("mine");

        // The oldest entry is loaded first; reading the second one fails.
        store.fail_after(StoreOp::Get, 1, TransportError::Timeout(Duration::from_secs(1)));
        assert!(b.pull(&ns("ns1"), 5).await.is_err());
        assert_eq!(buffers.contents(), vec!["old", "mine"]);
        assert!(b.snapshot().await.last_error.is_some());

        let report = b.pull(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.already_present, 1);
        assert_eq!(buffers.contents(), vec!["new", "old", "mine"]);
    }

    #[tokio::test]
    async fn partial_push_converges_on_retry() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("one");
        buffers.copy("two");

        store.fail_after(StoreOp::Put, 1, TransportError::CommandFailed("disk full".into()));
        assert!(a.push(&ns("ns1"), 5).await.is_err());
        assert_eq!(store.keys("ns1").len(), 1);

        // The entry already written is rewritten under the same key.
        a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(store.keys("ns1").len(), 2);
    }

    #[tokio::test]
    async fn local_failure_aborts() {
        let store = MemoryStore::new();
        insert(&store, "ns1", &remote_entry("hello", 1, 1));
        let (b, buffers) = engine(&store);
        buffers.set_unavailable(true);

        let err = b.pull(&ns("ns1"), 5).await.unwrap_err();
        assert!(matches!(err, SyncError::LocalBufferUnavailable(_)));
        assert_eq!(store.calls(StoreOp::Get), 0);
        assert!(b.snapshot().await.last_error.unwrap().contains("local buffers"));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let store = MemoryStore::new();
        let (a, buffers) = engine_with(&store, SyncConfig::default().with_retries(2, 1));
        buffers.copy("hello");
        store.fail_next(StoreOp::Put, TransportError::Unreachable("blip".into()));
        store.fail_next(StoreOp::Put, TransportError::Unreachable("blip".into()));

        let report = a.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(store.calls(StoreOp::Put), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let store = MemoryStore::new();
        let (a, buffers) = engine_with(&store, SyncConfig::default().with_retries(2, 1));
        buffers.copy("hello");
        store.set_unreachable(true);

        assert!(a.push(&ns("ns1"), 5).await.is_err());
        assert_eq!(store.calls(StoreOp::Put), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");
        store.set_latency(Some(Duration::from_secs(60)));

        let err = a.push(&ns("ns1"), 5).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::Timeout(_))));
    }

    // ===========================================
    // Buffer Change / Status / Persistence
    // ===========================================

    #[tokio::test]
    async fn buffer_change_without_buffers_is_noop() {
        let store = MemoryStore::new();
        let (a, _buffers) = engine(&store);

        let report = a.on_buffer_change(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report, PushReport::default());
        assert_eq!(a.snapshot().await.last_push_at, None);
    }

    #[tokio::test]
    async fn buffer_change_pushes() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");

        let report = a.on_buffer_change(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pushed, 1);
    }

    #[tokio::test]
    async fn status_reflects_sync() {
        let store = MemoryStore::new();
        let (a, buffers) = engine_with(&store, config().with_namespace("ns1"));
        buffers.copy("hello");
        a.sync_now(&ns("ns1"), 5).await.unwrap();

        let status = a.status().await;
        assert_eq!(status.server_id, Some(a.server_id()));
        assert_eq!(status.namespace, "ns1");
        assert_eq!(status.local_buffer_count, 1);
        assert_eq!(status.known_remote_count, 1);
        assert!(status.last_pull_at.is_some());
        assert!(status.last_push_at.is_some());
    }

    #[tokio::test]
    async fn state_is_saved_after_each_operation() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::in_dir(dir.path());
        let store = MemoryStore::new();
        let buffers = MemoryBuffers::new();
        buffers.copy("hello");
        let a = SyncEngine::new(ServerId::random(), config(), buffers, store.clone())
            .with_state_file(file.clone());

        a.push(&ns("ns1"), 5).await.unwrap();
        let saved = file.load().await.unwrap();
        assert_eq!(saved, a.snapshot().await);

        store.set_unreachable(true);
        assert!(a.pull(&ns("ns1"), 5).await.is_err());
        assert!(file.load().await.unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn restored_state_keeps_identity() {
        let store = MemoryStore::new();
        let (a, buffers) = engine(&store);
        buffers.copy("hello");
        a.push(&ns("ns1"), 5).await.unwrap();

        let restored = SyncEngine::new(a.server_id(), config(), buffers.clone(), store.clone())
            .with_state(a.snapshot().await);
        let report = restored.push(&ns("ns1"), 5).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(store.calls(StoreOp::Put), 1);
    }

    // ===========================================
    // Single-flight
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn operations_on_one_namespace_do_not_overlap() {
        let store = MemoryStore::new();
        store.set_latency(Some(Duration::from_millis(100)));
        let (a, buffers) = engine(&store);
        let a = Arc::new(a);
        buffers.copy("hello");

        let first = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.sync_now(&ns("ns1"), 5).await })
        };
        let second = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.sync_now(&ns("ns1"), 5).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // Serialized: the second run sees the first one's push as known.
        assert_eq!(store.calls(StoreOp::Put), 1);
    }
}
