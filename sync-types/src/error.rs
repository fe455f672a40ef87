//! Error types for tmux-buffer-sync.

use thiserror::Error;

/// Errors from encoding or decoding a stored buffer entry.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The stored value is not a well-formed entry.
    ///
    /// Callers treat this as a per-entry, skippable failure.
    #[error("corrupt entry: {0}")]
    CorruptEntry(String),
}

impl CodecError {
    /// Whether this error describes an undecodable remote value.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptEntry(_))
    }
}

/// Errors parsing identity types from their text form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Not valid URL-safe base64
    #[error("invalid base64 encoding")]
    InvalidEncoding,

    /// Decoded to the wrong number of bytes
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Decoded length.
        actual: usize,
    },

    /// Namespace name is empty, too long, or contains whitespace
    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),
}
