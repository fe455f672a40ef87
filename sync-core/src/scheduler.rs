//! Scheduler state machine.
//!
//! Decides what the dispatcher in sync-client should do for each trigger.
//! The machine takes a trigger and produces a new state plus a list of
//! actions; it never runs a sync itself. This is what enforces single-flight:
//! a run is only started from `Idle` or when a queued manual request is
//! promoted after the in-flight run completes.

/// Scheduler state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No sync running.
    Idle,
    /// A sync or push is running.
    SyncInProgress {
        /// A manual request arrived during the run and waits for it.
        manual_queued: bool,
    },
    /// Shut down. Accepts nothing.
    Stopped,
}

/// Things that can happen to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The daemon started.
    Startup,
    /// The periodic timer fired.
    Timer,
    /// A local copy happened.
    BufferChanged,
    /// The debounce window after the last copy elapsed.
    DebounceElapsed,
    /// A user asked for a sync.
    ManualRequest,
    /// The in-flight run finished, successfully or not.
    SyncCompleted,
    /// Shutdown was requested.
    ShutdownRequested,
}

/// Actions to be executed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start a pull-then-push.
    RunSyncNow,
    /// Start a push.
    RunPush,
    /// (Re)start the debounce window.
    ArmDebounce,
    /// Cancel the periodic timer and any pending debounce.
    CancelTimer,
    /// Reject manual requests that are waiting for a run.
    RejectQueued,
}

impl SchedulerState {
    /// Create a new machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process a trigger and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects.
    pub fn on_trigger(self, trigger: Trigger) -> (Self, Vec<Action>) {
        use SchedulerState::*;
        use Trigger::*;

        match (self, trigger) {
            // From Idle
            (Idle, Startup | Timer | ManualRequest) => (
                SyncInProgress {
                    manual_queued: false,
                },
                vec![Action::RunSyncNow],
            ),
            (Idle, BufferChanged) => (Idle, vec![Action::ArmDebounce]),
            (Idle, DebounceElapsed) => (
                SyncInProgress {
                    manual_queued: false,
                },
                vec![Action::RunPush],
            ),
            (Idle, ShutdownRequested) => (Stopped, vec![Action::CancelTimer]),

            // From SyncInProgress
            (state @ SyncInProgress { .. }, Startup | Timer | DebounceElapsed) => (state, vec![]),
            (state @ SyncInProgress { .. }, BufferChanged) => (state, vec![Action::ArmDebounce]),
            (SyncInProgress { .. }, ManualRequest) => (
                SyncInProgress {
                    manual_queued: true,
                },
                vec![],
            ),
            (
                SyncInProgress {
                    manual_queued: true,
                },
                SyncCompleted,
            ) => (
                SyncInProgress {
                    manual_queued: false,
                },
                vec![Action::RunSyncNow],
            ),
            (
                SyncInProgress {
                    manual_queued: false,
                },
                SyncCompleted,
            ) => (Idle, vec![]),
            (SyncInProgress { .. }, ShutdownRequested) => {
                (Stopped, vec![Action::CancelTimer, Action::RejectQueued])
            }

            // Stopped
            (Stopped, ManualRequest) => (Stopped, vec![Action::RejectQueued]),
            (Stopped, _) => (Stopped, vec![]),

            // Nothing in flight to complete
            (Idle, SyncCompleted) => (Idle, vec![]),
        }
    }

    /// Check if a run is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::SyncInProgress { .. })
    }

    /// Check if stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}
