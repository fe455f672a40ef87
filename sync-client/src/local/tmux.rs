//! tmux paste buffers via the tmux CLI.

use async_trait::async_trait;
use std::ffi::OsString;

use bufsync_types::LocalBuffer;

use super::{BufferListing, LocalBufferError, LocalBufferSource};
use crate::process;

/// Paste buffers of a tmux server.
#[derive(Debug, Clone)]
pub struct TmuxBuffers {
    bin: OsString,
    socket: Option<String>,
}

impl TmuxBuffers {
    /// Use `tmux` from `PATH` and the default server.
    pub fn new() -> Self {
        Self {
            bin: OsString::from("tmux"),
            socket: None,
        }
    }

    /// Use a specific tmux binary.
    pub fn with_bin(mut self, bin: impl Into<OsString>) -> Self {
        self.bin = bin.into();
        self
    }

    /// Talk to a specific server: a socket path (`-S`) when it contains a
    /// `/`, a socket name (`-L`) otherwise.
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    fn args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(rest.len() + 2);
        if let Some(socket) = &self.socket {
            args.push(if socket.contains('/') { "-S" } else { "-L" });
            args.push(socket.as_str());
        }
        args.extend_from_slice(rest);
        args
    }

    async fn tmux(&self, rest: &[&str], stdin: Option<&str>) -> Result<Vec<u8>, LocalBufferError> {
        let command = format!("tmux {}", rest.first().copied().unwrap_or_default());
        let output = process::run(&self.bin, self.args(rest), stdin)
            .await
            .map_err(|e| LocalBufferError::Unavailable(format!("{command}: {e}")))?;

        if !output.status.success() {
            return Err(LocalBufferError::CommandFailed {
                command,
                message: process::failure_message(&output),
            });
        }
        Ok(output.stdout)
    }

    /// Buffer names, most recent first.
    pub async fn names(&self) -> Result<Vec<String>, LocalBufferError> {
        let stdout = self
            .tmux(&["list-buffers", "-F", "#{buffer_name}"], None)
            .await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn show(&self, name: &str) -> Result<String, LocalBufferError> {
        let stdout = self.tmux(&["show-buffer", "-b", name], None).await?;
        String::from_utf8(stdout).map_err(|_| LocalBufferError::NotText(name.to_string()))
    }

    /// Value of a global user option such as `@buffer-sync-count`.
    ///
    /// `None` when unset or empty.
    pub async fn global_option(&self, option: &str) -> Result<Option<String>, LocalBufferError> {
        let stdout = self.tmux(&["show-options", "-gqv", option], None).await?;
        let value = String::from_utf8_lossy(&stdout).trim().to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }
}

impl Default for TmuxBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalBufferSource for TmuxBuffers {
    async fn list_recent(&self, count: usize) -> Result<BufferListing, LocalBufferError> {
        let names = self.names().await?;
        let complete = names.len() <= count;
        let mut buffers = Vec::new();
        for name in names.into_iter().take(count) {
            match self.show(&name).await {
                Ok(content) => buffers.push(LocalBuffer::new(name, content)),
                Err(LocalBufferError::NotText(name)) => {
                    tracing::debug!("Skipping non-text buffer {}", name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(BufferListing { buffers, complete })
    }

    async fn load(&self, name: &str, content: &str) -> Result<(), LocalBufferError> {
        self.tmux(&["load-buffer", "-b", name, "-"], Some(content))
            .await
            .map(|_| ())
    }

    async fn show_latest(&self) -> Result<Option<String>, LocalBufferError> {
        match self.names().await?.first() {
            Some(name) => self.show(name).await.map(Some),
            None => Ok(None),
        }
    }
}
