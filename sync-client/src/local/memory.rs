//! In-memory buffer stack for testing.
//!
//! Behaves like a tmux buffer stack: copies get automatic `bufferN` names and
//! land on top, loading a buffer moves it to the top.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bufsync_types::LocalBuffer;

use super::{BufferListing, LocalBufferError, LocalBufferSource};

/// In-memory local buffers for testing.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MemoryBuffers {
    inner: Arc<Mutex<MemoryBuffersInner>>,
}

#[derive(Debug, Default)]
struct MemoryBuffersInner {
    /// Most recent first.
    buffers: Vec<LocalBuffer>,
    /// Names of buffers holding non-text data.
    binary: Vec<String>,
    next_auto: u64,
    unavailable: bool,
    fail_next: Option<String>,
    loads: usize,
}

impl MemoryBuffers {
    /// Create an empty buffer stack.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryBuffersInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate a copy: push `content` under the next automatic name.
    pub fn copy(&self, content: &str) -> String {
        let mut inner = self.inner();
        let name = format!("buffer{}", inner.next_auto);
        inner.next_auto += 1;
        inner.buffers.insert(0, LocalBuffer::new(name.clone(), content));
        name
    }

    /// Simulate copying non-text data. Listings skip the buffer, as tmux
    /// listings skip buffers that are not UTF-8.
    pub fn copy_binary(&self) -> String {
        let name = self.copy("");
        self.inner().binary.push(name.clone());
        name
    }

    /// Overwrite a buffer in place without reordering (like `set-buffer`
    /// on an existing name).
    pub fn set(&self, name: &str, content: &str) {
        let mut inner = self.inner();
        match inner.buffers.iter_mut().find(|b| b.name == name) {
            Some(buffer) => buffer.content = content.to_string(),
            None => inner.buffers.insert(0, LocalBuffer::new(name, content)),
        }
    }

    /// Delete a buffer.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner();
        inner.buffers.retain(|b| b.name != name);
        inner.binary.retain(|b| b != name);
    }

    /// All buffers, most recent first.
    pub fn buffers(&self) -> Vec<LocalBuffer> {
        self.inner().buffers.clone()
    }

    /// All buffer contents, most recent first.
    pub fn contents(&self) -> Vec<String> {
        self.inner()
            .buffers
            .iter()
            .map(|b| b.content.clone())
            .collect()
    }

    /// Number of `load()` calls so far.
    pub fn load_count(&self) -> usize {
        self.inner().loads
    }

    /// Make every call fail as if the multiplexer were not running.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner().unavailable = unavailable;
    }

    /// Cause the next call to fail with the given message.
    pub fn fail_next(&self, message: &str) {
        self.inner().fail_next = Some(message.to_string());
    }

    fn check(inner: &mut MemoryBuffersInner, command: &str) -> Result<(), LocalBufferError> {
        if inner.unavailable {
            return Err(LocalBufferError::Unavailable("no server running".into()));
        }
        if let Some(message) = inner.fail_next.take() {
            return Err(LocalBufferError::CommandFailed {
                command: command.to_string(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LocalBufferSource for MemoryBuffers {
    async fn list_recent(&self, count: usize) -> Result<BufferListing, LocalBufferError> {
        let mut inner = self.inner();
        Self::check(&mut inner, "list-buffers")?;
        let buffers = inner
            .buffers
            .iter()
            .take(count)
            .filter(|b| !inner.binary.contains(&b.name))
            .cloned()
            .collect();
        Ok(BufferListing {
            buffers,
            complete: inner.buffers.len() <= count,
        })
    }

    async fn load(&self, name: &str, content: &str) -> Result<(), LocalBufferError> {
        let mut inner = self.inner();
        Self::check(&mut inner, "load-buffer")?;
        inner.buffers.retain(|b| b.name != name);
        inner.binary.retain(|b| b != name);
        inner.buffers.insert(0, LocalBuffer::new(name, content));
        inner.loads += 1;
        Ok(())
    }

    async fn show_latest(&self) -> Result<Option<String>, LocalBufferError> {
        let mut inner = self.inner();
        Self::check(&mut inner, "show-buffer")?;
        Ok(inner.buffers.first().map(|b| b.content.clone()))
    }
}
