//! # sync-client
//!
//! Client library for tmux-buffer-sync.
//!
//! Keeps the most recent tmux copy buffers of several servers in sync through
//! a shared atuin kv namespace.
//!
//! ## Features
//!
//! - **Sync Engine**: push, pull and merge with per-namespace single-flight
//! - **Scheduler**: periodic sync, debounced copy events, coalesced manual requests
//! - **Collaborator Traits**: pluggable local buffers (tmux, in-memory) and
//!   remote stores (atuin, in-memory)
//! - **Pure Policy**: identity ledger, retention and scheduling live in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use bufsync_client::{AtuinStore, SyncConfig, SyncEngine, TmuxBuffers};
//!
//! let config = SyncConfig::default();
//! let namespace = config.namespace()?;
//! let engine = SyncEngine::new(server_id, config, TmuxBuffers::new(), AtuinStore::new());
//!
//! let report = engine.sync_now(&namespace, 5).await?;
//! println!("pulled {}, pushed {}", report.pull.pulled, report.push.pushed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod local;
pub mod persist;
mod process;
pub mod remote;
pub mod scheduler;
pub mod status;

pub use config::{ConfigError, SyncConfig};
pub use engine::{SyncEngine, SyncError};
pub use local::{
    BufferListing, LocalBufferError, LocalBufferSource, MemoryBuffers, TmuxBuffers,
};
pub use persist::{StateFile, StateFileError};
pub use remote::{AtuinStore, MemoryStore, RemoteStore, StoreOp, TransportError};
pub use scheduler::{SchedulerError, SchedulerHandle};
