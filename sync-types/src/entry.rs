//! Buffer entries and the listing types built around them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::{ContentHash, EntryId, Sequence, ServerId};

/// A single synchronizable copy buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct BufferEntry {
    /// Derived from `(origin, content_hash, sequence)`.
    pub id: EntryId,
    /// The buffer's text.
    pub content: String,
    /// Server that first created this buffer. Never changes across hops.
    pub origin: ServerId,
    /// Per-origin creation counter.
    pub sequence: Sequence,
    /// Unix milliseconds at creation. Display and eviction order only.
    pub captured_at: u64,
}

impl BufferEntry {
    /// Create an entry, deriving its id.
    pub fn new(origin: ServerId, sequence: Sequence, content: String, captured_at: u64) -> Self {
        let id = EntryId::derive(&origin, &ContentHash::of(&content), sequence);
        Self {
            id,
            content,
            origin,
            sequence,
            captured_at,
        }
    }

    /// SHA-256 of the content.
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of(&self.content)
    }

    /// Check that `id` matches the rest of the entry.
    pub fn verify(&self) -> bool {
        self.id == EntryId::derive(&self.origin, &self.content_hash(), self.sequence)
    }

    /// Listing metadata for this entry.
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }
}

impl fmt::Debug for BufferEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferEntry")
            .field("id", &self.id)
            .field(
                "content",
                &format!("[{} bytes REDACTED]", self.content.len()),
            )
            .field("origin", &self.origin)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Ordering metadata of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Unix milliseconds at creation.
    pub captured_at: u64,
    /// Per-origin creation counter.
    pub sequence: Sequence,
}

/// One key in a namespace listing, with the metadata needed to order it.
///
/// Values that cannot be decoded list with zeroed metadata, which places
/// them first in line for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteKey {
    /// The store key (an entry id in display form).
    pub key: String,
    /// Unix milliseconds at creation.
    pub captured_at: u64,
    /// Per-origin creation counter.
    pub sequence: Sequence,
}

impl RemoteKey {
    /// Build a listing row from a key and its (possibly missing) metadata.
    pub fn new(key: impl Into<String>, meta: Option<EntryMeta>) -> Self {
        let meta = meta.unwrap_or_default();
        Self {
            key: key.into(),
            captured_at: meta.captured_at,
            sequence: meta.sequence,
        }
    }

    /// Age order: oldest first by `(captured_at, sequence)`, then key.
    pub fn age_cmp(&self, other: &Self) -> Ordering {
        self.captured_at
            .cmp(&other.captured_at)
            .then(self.sequence.cmp(&other.sequence))
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// A named buffer as held by the terminal multiplexer.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalBuffer {
    /// Multiplexer buffer name.
    pub name: String,
    /// Buffer text.
    pub content: String,
}

impl LocalBuffer {
    /// Create a local buffer.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

impl fmt::Debug for LocalBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBuffer")
            .field("name", &self.name)
            .field(
                "content",
                &format!("[{} bytes REDACTED]", self.content.len()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> ServerId {
        ServerId::from_bytes(&[1u8; 32]).unwrap()
    }

    #[test]
    fn new_entry_verifies() {
        let entry = BufferEntry::new(origin(), Sequence::new(1), "hello".into(), 10);
        assert!(entry.verify());
    }

    #[test]
    fn tampered_entry_fails_verification() {
        let mut entry = BufferEntry::new(origin(), Sequence::new(1), "hello".into(), 10);
        entry.content = "goodbye".into();
        assert!(!entry.verify());
    }

    #[test]
    fn captured_at_does_not_affect_id() {
        let a = BufferEntry::new(origin(), Sequence::new(1), "hello".into(), 10);
        let b = BufferEntry::new(origin(), Sequence::new(1), "hello".into(), 99);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn debug_redacts_content() {
        let entry = BufferEntry::new(origin(), Sequence::new(1), "s3cret".into(), 10);
        let debug = format!("{:?}", entry);
        assert!(debug.contains("[6 bytes REDACTED]"));
        assert!(!debug.contains("s3cret"));

        let buffer = LocalBuffer::new("buffer0", "s3cret");
        assert!(!format!("{:?}", buffer).contains("s3cret"));
    }

    #[test]
    fn age_cmp_breaks_ties_by_sequence_then_key() {
        let older = RemoteKey {
            key: "b".into(),
            captured_at: 5,
            sequence: Sequence::new(1),
        };
        let newer_seq = RemoteKey {
            key: "a".into(),
            captured_at: 5,
            sequence: Sequence::new(2),
        };
        assert_eq!(older.age_cmp(&newer_seq), Ordering::Less);

        let same_but_key = RemoteKey {
            key: "c".into(),
            ..older.clone()
        };
        assert_eq!(older.age_cmp(&same_but_key), Ordering::Less);
    }

    #[test]
    fn remote_key_without_meta_is_zeroed() {
        let key = RemoteKey::new("k", None);
        assert_eq!(key.captured_at, 0);
        assert_eq!(key.sequence, Sequence::zero());
    }
}
