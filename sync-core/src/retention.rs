//! Selection and retention policy.
//!
//! Namespace order is age order: `(captured_at, sequence)`, with the store
//! key as the final tie-break so every server makes the same choice.

use bufsync_types::{BufferEntry, EntryId, RemoteKey, ServerId};

use crate::ledger::TrackedBuffer;

/// The `count` most recent keys, most recent first.
pub fn select_for_pull(keys: &[RemoteKey], count: usize) -> Vec<RemoteKey> {
    let mut sorted = keys.to_vec();
    sorted.sort_by(|a, b| b.age_cmp(a));
    sorted.truncate(count);
    sorted
}

/// Keys to delete so that at most `bound` remain, oldest first.
pub fn plan_eviction(keys: &[RemoteKey], bound: usize) -> Vec<RemoteKey> {
    if keys.len() <= bound {
        return Vec::new();
    }
    let mut sorted = keys.to_vec();
    sorted.sort_by(|a, b| a.age_cmp(b));
    sorted.truncate(keys.len() - bound);
    sorted
}

/// Entries a push should write, oldest first.
///
/// Takes the `count` most recent tracked buffers, then keeps those created by
/// `me` that are not yet known to be in the namespace. Entries pulled from
/// other servers are never selected.
pub fn select_for_push<F>(
    tracked: &[TrackedBuffer],
    count: usize,
    me: &ServerId,
    is_known: F,
) -> Vec<BufferEntry>
where
    F: Fn(&EntryId) -> bool,
{
    let mut selected: Vec<BufferEntry> = tracked
        .iter()
        .take(count)
        .filter(|t| &t.entry.origin == me && !is_known(&t.entry.id))
        .map(|t| t.entry.clone())
        .collect();
    selected.reverse();
    selected
}
