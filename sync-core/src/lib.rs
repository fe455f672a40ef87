//! # sync-core
//!
//! Pure logic for tmux-buffer-sync (no I/O, instant tests).
//!
//! This crate implements the bookkeeping, selection policy and scheduling
//! state machine of the sync engine without any process, network or disk
//! I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The actual I/O (tmux, atuin, the state file) is
//! performed by `sync-client`, which interprets the decisions made here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod ledger;
pub mod retention;
pub mod scheduler;
pub mod state;

pub use backoff::Backoff;
pub use ledger::{pulled_name, BufferLedger, LedgerRecord, TrackedBuffer, PULLED_PREFIX};
pub use retention::{plan_eviction, select_for_pull, select_for_push};
pub use scheduler::{Action, SchedulerState, Trigger};
pub use state::SyncState;
