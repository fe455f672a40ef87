//! Per-server sync state.
//!
//! Held in memory by the Sync Engine and persisted to the state file after
//! every operation. Every field defaults, so state files written by older or
//! newer versions still load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use bufsync_types::{EntryId, Sequence};

use crate::ledger::BufferLedger;

/// Everything a server remembers between syncs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    /// Unix millis of the last successful push.
    pub last_push_at: Option<u64>,
    /// Unix millis of the last successful pull.
    pub last_pull_at: Option<u64>,
    /// Last recorded error, cleared by the next successful operation.
    pub last_error: Option<String>,
    /// Ids observed in each namespace, keyed by namespace name.
    pub known_remote_ids: BTreeMap<String, BTreeSet<EntryId>>,
    /// Last sequence handed to a local copy.
    pub local_sequence_counter: Sequence,
    /// Identity of local buffers.
    pub ledger: BufferLedger,
    /// Local buffers observed at the last sync.
    pub local_buffer_count: usize,
}

impl SyncState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is known to be in `namespace`.
    pub fn is_known(&self, namespace: &str, id: &EntryId) -> bool {
        self.known_remote_ids
            .get(namespace)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Mark ids as present in `namespace`.
    pub fn mark_known<I>(&mut self, namespace: &str, ids: I)
    where
        I: IntoIterator<Item = EntryId>,
    {
        self.known_remote_ids
            .entry(namespace.to_string())
            .or_default()
            .extend(ids);
    }

    /// Keep only the known ids of `namespace` for which `keep` holds.
    pub fn retain_known<F>(&mut self, namespace: &str, mut keep: F)
    where
        F: FnMut(&EntryId) -> bool,
    {
        if let Some(ids) = self.known_remote_ids.get_mut(namespace) {
            ids.retain(|id| keep(id));
        }
    }

    /// Number of ids known in `namespace`.
    pub fn known_count(&self, namespace: &str) -> usize {
        self.known_remote_ids
            .get(namespace)
            .map_or(0, BTreeSet::len)
    }

    /// Record a failed operation.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Record a successful push at `now`.
    pub fn record_push(&mut self, now: u64) {
        self.last_push_at = Some(now);
        self.last_error = None;
    }

    /// Record a successful pull at `now`.
    pub fn record_pull(&mut self, now: u64) {
        self.last_pull_at = Some(now);
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bufsync_types::{ContentHash, ServerId};

    fn id(n: u64) -> EntryId {
        EntryId::derive(
            &ServerId::from_bytes(&[3u8; 32]).unwrap(),
            &ContentHash::of("x"),
            Sequence::new(n),
        )
    }

    #[test]
    fn known_ids_are_scoped_by_namespace() {
        let mut state = SyncState::new();
        state.mark_known("ns1", [id(1), id(2)]);

        assert!(state.is_known("ns1", &id(1)));
        assert!(!state.is_known("ns2", &id(1)));
        assert_eq!(state.known_count("ns1"), 2);
        assert_eq!(state.known_count("ns2"), 0);
    }

    #[test]
    fn mark_known_is_idempotent() {
        let mut state = SyncState::new();
        state.mark_known("ns1", [id(1)]);
        state.mark_known("ns1", [id(1)]);
        assert_eq!(state.known_count("ns1"), 1);
    }

    #[test]
    fn retain_known_prunes() {
        let mut state = SyncState::new();
        state.mark_known("ns1", [id(1), id(2), id(3)]);
        state.retain_known("ns1", |i| i != &id(2));
        assert!(!state.is_known("ns1", &id(2)));
        assert_eq!(state.known_count("ns1"), 2);

        // Unknown namespace is a no-op.
        state.retain_known("nope", |_| false);
    }

    #[test]
    fn success_clears_error() {
        let mut state = SyncState::new();
        state.record_error("remote store unreachable");
        assert!(state.last_error.is_some());

        state.record_pull(10);
        assert!(state.last_error.is_none());
        assert_eq!(state.last_pull_at, Some(10));
        assert_eq!(state.last_push_at, None);
    }

    #[test]
    fn missing_fields_default() {
        let state: SyncState = serde_json::from_str(r#"{"last_push_at":5}"#).unwrap();
        assert_eq!(state.last_push_at, Some(5));
        assert_eq!(state.local_sequence_counter, Sequence::zero());
        assert!(state.ledger.is_empty());
    }

    #[test]
    fn unknown_fields_ignored() {
        let state: SyncState =
            serde_json::from_str(r#"{"local_sequence_counter":9,"future_field":[1,2]}"#).unwrap();
        assert_eq!(state.local_sequence_counter, Sequence::new(9));
    }

    #[test]
    fn state_json_roundtrip() {
        let mut state = SyncState::new();
        state.mark_known("ns1", [id(1)]);
        state.local_sequence_counter = Sequence::new(4);
        state.record_error("boom");

        let json = serde_json::to_string(&state).unwrap();
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
