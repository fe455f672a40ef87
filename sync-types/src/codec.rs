//! Buffer Codec - the value format of an entry in the remote store.
//!
//! Entries are stored as compact JSON objects:
//!
//! ```text
//! {"v":1,"id":"…","origin":"…","seq":3,"captured_at":1705000000000,"content":"…"}
//! ```
//!
//! Decoding ignores unknown fields so servers running newer versions can add
//! fields without breaking older ones. A value that is missing a required
//! field, carries an unparsable identity, or whose `id` does not match its
//! `(origin, content, seq)` is a [`CodecError::CorruptEntry`].

use serde::{Deserialize, Serialize};

use crate::{BufferEntry, CodecError, EntryId, EntryMeta, Sequence, ServerId};

/// Version written into every encoded entry.
pub const WIRE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct WireEntry {
    #[serde(default = "default_version")]
    v: u32,
    id: String,
    origin: String,
    seq: u64,
    captured_at: u64,
    content: String,
}

#[derive(Deserialize)]
struct WireMeta {
    captured_at: u64,
    #[serde(default)]
    seq: u64,
}

fn default_version() -> u32 {
    WIRE_VERSION
}

/// Encode an entry as a store value.
pub fn encode(entry: &BufferEntry) -> Result<String, CodecError> {
    let wire = WireEntry {
        v: WIRE_VERSION,
        id: entry.id.to_string(),
        origin: entry.origin.to_string(),
        seq: entry.sequence.value(),
        captured_at: entry.captured_at,
        content: entry.content.clone(),
    };
    serde_json::to_string(&wire).map_err(CodecError::Serialization)
}

/// Decode a store value into a verified entry.
pub fn decode(value: &str) -> Result<BufferEntry, CodecError> {
    let wire: WireEntry = serde_json::from_str(value)
        .map_err(|e| CodecError::CorruptEntry(format!("malformed payload: {e}")))?;

    let id: EntryId = wire
        .id
        .parse()
        .map_err(|e| CodecError::CorruptEntry(format!("invalid id: {e}")))?;
    let origin: ServerId = wire
        .origin
        .parse()
        .map_err(|e| CodecError::CorruptEntry(format!("invalid origin: {e}")))?;

    let entry = BufferEntry {
        id,
        content: wire.content,
        origin,
        sequence: Sequence::new(wire.seq),
        captured_at: wire.captured_at,
    };

    if !entry.verify() {
        return Err(CodecError::CorruptEntry(format!(
            "id {} does not match content",
            entry.id
        )));
    }

    Ok(entry)
}

/// Extract ordering metadata without fully decoding.
///
/// Used by store adapters to build listings. Returns `None` for values that
/// carry no readable `captured_at`.
pub fn peek_meta(value: &str) -> Option<EntryMeta> {
    let meta: WireMeta = serde_json::from_str(value).ok()?;
    Some(EntryMeta {
        captured_at: meta.captured_at,
        sequence: Sequence::new(meta.seq),
    })
}
