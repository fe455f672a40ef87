//! Local buffer source abstraction.
//!
//! The terminal multiplexer's paste buffers, consumed as a capability:
//! - `list_recent()` returns a window of buffers, most recent first
//! - `load()` creates or overwrites a named buffer
//! - `show_latest()` returns the newest buffer's content
//!
//! [`TmuxBuffers`] drives tmux through its CLI; [`MemoryBuffers`] is an
//! in-memory stack for tests.

mod memory;
mod tmux;

pub use memory::MemoryBuffers;
pub use tmux::TmuxBuffers;

use async_trait::async_trait;
use thiserror::Error;

use bufsync_types::LocalBuffer;

/// Local buffer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalBufferError {
    /// The multiplexer could not be reached.
    #[error("terminal multiplexer unavailable: {0}")]
    Unavailable(String),

    /// A multiplexer command failed.
    #[error("`{command}` failed: {message}")]
    CommandFailed {
        /// Command that failed.
        command: String,
        /// Its error output.
        message: String,
    },

    /// Buffer content is not UTF-8 text.
    #[error("buffer {0} is not valid UTF-8")]
    NotText(String),
}

/// A window of the most recent buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferListing {
    /// Readable buffers, most recent first. Non-text buffers are left out.
    pub buffers: Vec<LocalBuffer>,
    /// No buffer exists beyond the window.
    pub complete: bool,
}

/// Local buffer storage of one server.
#[async_trait]
pub trait LocalBufferSource: Send + Sync {
    /// The `count` most recent buffers.
    async fn list_recent(&self, count: usize) -> Result<BufferListing, LocalBufferError>;

    /// Create or overwrite the buffer `name`. It becomes the most recent.
    async fn load(&self, name: &str, content: &str) -> Result<(), LocalBufferError>;

    /// Content of the most recent buffer, `None` when there are no buffers.
    async fn show_latest(&self) -> Result<Option<String>, LocalBufferError>;
}
