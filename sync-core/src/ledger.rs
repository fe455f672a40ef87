//! Buffer ledger: which entry each local buffer is.
//!
//! The multiplexer only knows buffer names and contents. The ledger maps a
//! buffer name to the identity of the entry it holds, so that a pulled buffer
//! keeps its original id and origin and is never mistaken for a new local
//! copy.
//!
//! Rules applied by [`BufferLedger::reconcile`]:
//! - a listed buffer whose record matches its content keeps its record
//! - a listed buffer that is unknown (or whose content changed) becomes a new
//!   local copy, unless its name carries [`PULLED_PREFIX`]
//! - unknown buffers with the pulled prefix are never claimed
//! - records of buffers that no longer exist are pruned

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use bufsync_types::{BufferEntry, ContentHash, EntryId, LocalBuffer, Sequence, ServerId};

/// Name prefix of buffers loaded by a pull.
pub const PULLED_PREFIX: &str = "bufsync-";

/// Upper bound on ledger records. Oldest records are dropped beyond this.
pub const MAX_RECORDS: usize = 1024;

/// Local buffer name for a pulled entry.
pub fn pulled_name(id: &EntryId) -> String {
    format!("{}{}", PULLED_PREFIX, id.short())
}

/// Identity of the entry held by one local buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Entry id
    pub id: EntryId,
    /// Server that created the entry
    pub origin: ServerId,
    /// Origin's creation counter
    pub sequence: Sequence,
    /// Unix millis at creation
    pub captured_at: u64,
    /// Hash of the content the record was made for
    pub content_hash: ContentHash,
}

impl LedgerRecord {
    /// Record for an entry.
    pub fn of(entry: &BufferEntry) -> Self {
        Self {
            id: entry.id,
            origin: entry.origin,
            sequence: entry.sequence,
            captured_at: entry.captured_at,
            content_hash: entry.content_hash(),
        }
    }

    fn to_entry(&self, content: String) -> BufferEntry {
        BufferEntry {
            id: self.id,
            content,
            origin: self.origin,
            sequence: self.sequence,
            captured_at: self.captured_at,
        }
    }
}

/// A listed local buffer together with the entry it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedBuffer {
    /// Multiplexer buffer name
    pub name: String,
    /// The entry
    pub entry: BufferEntry,
}

/// Map from local buffer name to entry identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferLedger {
    records: BTreeMap<String, LedgerRecord>,
}

impl BufferLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a listing of local buffers against the ledger.
    ///
    /// `listed` is most-recent first. `complete` says whether the listing
    /// holds every local buffer; records are only pruned for names missing
    /// from a complete listing. New local copies take sequences from
    /// `counter`, oldest first, and are stamped with `origin` and `now`.
    ///
    /// Returns the tracked buffers, most-recent first. Unclaimed pulled-prefix
    /// buffers are left out.
    pub fn reconcile(
        &mut self,
        listed: &[LocalBuffer],
        complete: bool,
        origin: ServerId,
        counter: &mut Sequence,
        now: u64,
    ) -> Vec<TrackedBuffer> {
        if complete {
            self.records
                .retain(|name, _| listed.iter().any(|b| &b.name == name));
        }

        let mut tracked: Vec<Option<TrackedBuffer>> = vec![None; listed.len()];

        // Oldest first so new copies are numbered in creation order.
        for (idx, buffer) in listed.iter().enumerate().rev() {
            let hash = ContentHash::of(&buffer.content);

            if let Some(record) = self.records.get(&buffer.name) {
                if record.content_hash == hash {
                    tracked[idx] = Some(TrackedBuffer {
                        name: buffer.name.clone(),
                        entry: record.to_entry(buffer.content.clone()),
                    });
                    continue;
                }
                self.records.remove(&buffer.name);
            }

            if buffer.name.starts_with(PULLED_PREFIX) {
                continue;
            }

            *counter = counter.next();
            let entry = BufferEntry::new(origin, *counter, buffer.content.clone(), now);
            self.records
                .insert(buffer.name.clone(), LedgerRecord::of(&entry));
            tracked[idx] = Some(TrackedBuffer {
                name: buffer.name.clone(),
                entry,
            });
        }

        self.enforce_bound();
        tracked.into_iter().flatten().collect()
    }

    /// Record an entry loaded by a pull. Returns the buffer name it was
    /// loaded under.
    pub fn record_pulled(&mut self, entry: &BufferEntry) -> String {
        let name = pulled_name(&entry.id);
        self.records.insert(name.clone(), LedgerRecord::of(entry));
        self.enforce_bound();
        name
    }

    /// Whether some local buffer holds the entry.
    pub fn contains_id(&self, id: &EntryId) -> bool {
        self.records.values().any(|r| &r.id == id)
    }

    /// Record for a buffer name.
    pub fn get(&self, name: &str) -> Option<&LedgerRecord> {
        self.records.get(name)
    }

    /// Ids of every tracked entry.
    pub fn ids(&self) -> impl Iterator<Item = &EntryId> {
        self.records.values().map(|r| &r.id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn enforce_bound(&mut self) {
        while self.records.len() > MAX_RECORDS {
            let oldest = self
                .records
                .iter()
                .min_by(|a, b| {
                    (a.1.captured_at, a.1.sequence)
                        .cmp(&(b.1.captured_at, b.1.sequence))
                        .then_with(|| a.0.cmp(b.0))
                })
                .map(|(name, _)| name.clone());
            match oldest {
                Some(name) => {
                    self.records.remove(&name);
                }
                None => break,
            }
        }
    }
}
