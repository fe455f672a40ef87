//! # sync-types
//!
//! Entry, identity and wire types for tmux-buffer-sync.
//!
//! This crate provides the foundational types used across all tmux-buffer-sync crates:
//! - [`ServerId`], [`EntryId`], [`ContentHash`], [`Sequence`], [`Namespace`] - Identity and ordering types
//! - [`BufferEntry`] - A synchronizable copy buffer
//! - [`codec`] - The value format stored in the shared key-value store
//! - [`Request`], [`Response`], [`Status`] - Daemon control protocol
//! - [`CodecError`], [`IdError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod entry;
mod error;
mod ids;
mod messages;

pub use codec::{decode, encode, peek_meta};
pub use entry::{BufferEntry, EntryMeta, LocalBuffer, RemoteKey};
pub use error::{CodecError, IdError};
pub use ids::{ContentHash, EntryId, Namespace, Sequence, ServerId};
pub use messages::{PullReport, PushReport, Request, Response, Status, SyncReport};

/// Current time as unix milliseconds.
///
/// Informational only: clocks across servers are not assumed synchronized.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
