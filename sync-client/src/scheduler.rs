//! Scheduler dispatcher.
//!
//! Runs the pure [`SchedulerState`] machine from sync-core as one tokio task,
//! turning its actions into engine runs, timers and replies.
//!
//! The task selects over four event sources:
//!
//! - the periodic interval (`sync_frequency`, missed ticks skipped)
//! - the debounce sleep (trailing edge, reset by every copy event)
//! - the in-flight run's `JoinHandle`
//! - the command channel fed by [`SchedulerHandle`]

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use bufsync_core::{Action, SchedulerState, Trigger};
use bufsync_types::{Namespace, SyncReport};

use crate::engine::SyncEngine;
use crate::local::LocalBufferSource;
use crate::remote::RemoteStore;

const COMMAND_BUFFER: usize = 32;

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The scheduler is shutting down or gone.
    #[error("scheduler stopped")]
    Stopped,

    /// The sync run serving the request failed.
    #[error("sync failed: {0}")]
    SyncFailed(String),
}

type RunResult = Result<SyncReport, String>;
type Reply = oneshot::Sender<Result<SyncReport, SchedulerError>>;

enum Command {
    SyncNow(Reply),
    BufferChanged,
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running scheduler. Clones talk to the same task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::SyncNow(_) => f.write_str("SyncNow"),
            Command::BufferChanged => f.write_str("BufferChanged"),
            Command::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

impl SchedulerHandle {
    /// Ask for a sync and wait for the run that serves it.
    ///
    /// If a run is already in flight the request waits for it, then gets the
    /// result of the follow-up run. Concurrent requests share that run.
    pub async fn request_sync(&self) -> Result<SyncReport, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::SyncNow(reply))
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Report a local copy. Returns once the scheduler has seen it.
    pub async fn buffer_changed(&self) -> Result<(), SchedulerError> {
        self.tx
            .send(Command::BufferChanged)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Stop the scheduler: cancel timers, reject queued requests, and wait
    /// for the in-flight run to finish.
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Whether the scheduler task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start the scheduler for `namespace`. It runs a full sync right away.
pub fn spawn<L, R>(engine: Arc<SyncEngine<L, R>>, namespace: Namespace) -> SchedulerHandle
where
    L: LocalBufferSource + 'static,
    R: RemoteStore + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    tokio::spawn(Dispatcher::new(engine, namespace).run(rx));
    SchedulerHandle { tx }
}

struct Dispatcher<L: LocalBufferSource, R: RemoteStore> {
    engine: Arc<SyncEngine<L, R>>,
    namespace: Namespace,
    state: SchedulerState,
    debounce_armed: bool,
    timer_cancelled: bool,
    in_flight: Option<JoinHandle<RunResult>>,
    /// Waiting for the in-flight run.
    serving: Vec<Reply>,
    /// Waiting for the next run.
    queued: Vec<Reply>,
    /// Acknowledged once the task exits.
    stop_acks: Vec<oneshot::Sender<()>>,
}

impl<L, R> Dispatcher<L, R>
where
    L: LocalBufferSource + 'static,
    R: RemoteStore + 'static,
{
    fn new(engine: Arc<SyncEngine<L, R>>, namespace: Namespace) -> Self {
        Self {
            engine,
            namespace,
            state: SchedulerState::new(),
            debounce_armed: false,
            timer_cancelled: false,
            in_flight: None,
            serving: Vec::new(),
            queued: Vec::new(),
            stop_acks: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let period = self.engine.config().frequency();
        let debounce_period = self.engine.config().debounce();

        // The first tick is one period out; Startup covers time zero.
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let debounce = time::sleep(debounce_period);
        tokio::pin!(debounce);

        tracing::info!(
            namespace = %self.namespace,
            "Scheduler started (every {:?}, debounce {:?})",
            period,
            debounce_period
        );
        self.apply(Trigger::Startup, &mut debounce);
        let mut commands_open = true;

        loop {
            if self.state.is_stopped() && self.in_flight.is_none() {
                break;
            }

            tokio::select! {
                _ = interval.tick(), if !self.timer_cancelled => {
                    tracing::debug!("Periodic sync due");
                    self.apply(Trigger::Timer, &mut debounce);
                }
                () = &mut debounce, if self.debounce_armed => {
                    self.debounce_armed = false;
                    self.apply(Trigger::DebounceElapsed, &mut debounce);
                }
                result = join(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.complete(result);
                    self.apply(Trigger::SyncCompleted, &mut debounce);
                }
                command = rx.recv(), if commands_open => match command {
                    Some(Command::SyncNow(reply)) => {
                        self.queued.push(reply);
                        self.apply(Trigger::ManualRequest, &mut debounce);
                    }
                    Some(Command::BufferChanged) => {
                        self.apply(Trigger::BufferChanged, &mut debounce);
                    }
                    Some(Command::Shutdown(ack)) => {
                        self.stop_acks.push(ack);
                        self.apply(Trigger::ShutdownRequested, &mut debounce);
                    }
                    None => {
                        commands_open = false;
                        self.apply(Trigger::ShutdownRequested, &mut debounce);
                    }
                },
                else => break,
            }
        }

        drop(rx);
        tracing::info!(namespace = %self.namespace, "Scheduler stopped");
        for ack in self.stop_acks.drain(..) {
            let _ = ack.send(());
        }
    }

    fn apply(&mut self, trigger: Trigger, debounce: &mut std::pin::Pin<&mut time::Sleep>) {
        let (next, actions) = self.state.on_trigger(trigger);
        if next != self.state {
            tracing::debug!("Scheduler {:?} --{:?}--> {:?}", self.state, trigger, next);
        }
        self.state = next;

        for action in actions {
            match action {
                Action::RunSyncNow => {
                    self.serving.append(&mut self.queued);
                    self.start_sync();
                }
                Action::RunPush => self.start_push(),
                Action::ArmDebounce => {
                    debounce
                        .as_mut()
                        .reset(Instant::now() + self.engine.config().debounce());
                    self.debounce_armed = true;
                }
                Action::CancelTimer => {
                    self.timer_cancelled = true;
                    self.debounce_armed = false;
                }
                Action::RejectQueued => {
                    for reply in self.queued.drain(..) {
                        let _ = reply.send(Err(SchedulerError::Stopped));
                    }
                }
            }
        }
    }

    fn start_sync(&mut self) {
        let engine = Arc::clone(&self.engine);
        let namespace = self.namespace.clone();
        let count = engine.config().sync_count;
        self.in_flight = Some(tokio::spawn(async move {
            engine
                .sync_now(&namespace, count)
                .await
                .map_err(|e| e.to_string())
        }));
    }

    fn start_push(&mut self) {
        let engine = Arc::clone(&self.engine);
        let namespace = self.namespace.clone();
        let count = engine.config().sync_count;
        self.in_flight = Some(tokio::spawn(async move {
            engine
                .on_buffer_change(&namespace, count)
                .await
                .map(|push| SyncReport {
                    push,
                    ..SyncReport::default()
                })
                .map_err(|e| e.to_string())
        }));
    }

    fn complete(&mut self, result: RunResult) {
        let reply = result.map_err(SchedulerError::SyncFailed);
        for waiter in self.serving.drain(..) {
            let _ = waiter.send(reply.clone());
        }
    }
}

/// Wait for the in-flight run. Only polled while one exists.
async fn join(task: &mut Option<JoinHandle<RunResult>>) -> RunResult {
    match task {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(format!("sync task failed: {}", e)),
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::local::MemoryBuffers;
    use crate::remote::{MemoryStore, StoreOp, TransportError};
    use bufsync_types::ServerId;
    use std::time::Duration;

    fn setup(config: SyncConfig) -> (SchedulerHandle, MemoryBuffers, MemoryStore) {
        let store = MemoryStore::new();
        let buffers = MemoryBuffers::new();
        let engine = Arc::new(SyncEngine::new(
            ServerId::random(),
            config,
            buffers.clone(),
            store.clone(),
        ));
        let handle = spawn(engine, Namespace::new("ns1").unwrap());
        (handle, buffers, store)
    }

    fn config() -> SyncConfig {
        SyncConfig::default().with_retries(0, 1)
    }

    // ===========================================
    // Triggers
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn startup_runs_full_sync() {
        let store = MemoryStore::new();
        let buffers = MemoryBuffers::new();
        buffers.copy("hello");
        let engine = Arc::new(SyncEngine::new(
            ServerId::random(),
            config(),
            buffers,
            store.clone(),
        ));
        let handle = spawn(engine, Namespace::new("ns1").unwrap());

        // Queued behind the startup run, served by the follow-up.
        let report = handle.request_sync().await.unwrap();
        assert_eq!(report.push.pushed, 0);
        assert_eq!(store.keys("ns1").len(), 1);
        assert_eq!(store.calls(StoreOp::Refresh), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn copy_events_are_debounced() {
        let (handle, buffers, store) = setup(config().with_debounce_ms(500));
        handle.request_sync().await.unwrap();

        buffers.copy("one");
        handle.buffer_changed().await.unwrap();
        time::sleep(Duration::from_millis(300)).await;
        buffers.copy("two");
        handle.buffer_changed().await.unwrap();

        // 300ms after the second event: still inside its window.
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.calls(StoreOp::Put), 0);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.calls(StoreOp::Put), 2);
        // One push run, not a full sync.
        assert_eq!(store.calls(StoreOp::Refresh), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_syncs() {
        let (handle, buffers, store) = setup(config().with_frequency(60));
        handle.request_sync().await.unwrap();
        let refreshes = store.calls(StoreOp::Refresh);

        buffers.copy("later");
        time::sleep(Duration::from_secs(61)).await;

        assert_eq!(store.calls(StoreOp::Refresh), refreshes + 1);
        assert_eq!(store.keys("ns1").len(), 1);

        handle.shutdown().await;
    }

    // ===========================================
    // Coalescing
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn manual_requests_coalesce() {
        let (handle, _buffers, store) = setup(config());
        store.set_latency(Some(Duration::from_secs(1)));

        let requests: Vec<_> = (0..3)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.request_sync().await })
            })
            .collect();
        for request in requests {
            request.await.unwrap().unwrap();
        }

        // The startup run plus one shared follow-up.
        assert_eq!(store.calls(StoreOp::Refresh), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_reaches_waiters() {
        let (handle, _buffers, store) = setup(config());
        store.set_unreachable(true);

        let err = handle.request_sync().await.unwrap_err();
        assert!(matches!(err, SchedulerError::SyncFailed(msg) if msg.contains("unreachable")));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_failure() {
        let (handle, buffers, store) = setup(config());
        store.fail_next(StoreOp::Refresh, TransportError::Unreachable("down".into()));
        buffers.copy("hello");

        // Startup fails; the queued request runs against a healthy store.
        handle.request_sync().await.unwrap();
        assert_eq!(store.keys("ns1").len(), 1);

        handle.shutdown().await;
    }

    // ===========================================
    // Shutdown
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_queued_and_waits_for_in_flight() {
        let (handle, buffers, store) = setup(config());
        buffers.copy("hello");
        store.set_latency(Some(Duration::from_secs(1)));

        let queued = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.request_sync().await })
        };
        tokio::task::yield_now().await;

        handle.shutdown().await;

        assert_eq!(queued.await.unwrap(), Err(SchedulerError::Stopped));
        // The startup run finished before shutdown returned.
        assert_eq!(store.keys("ns1").len(), 1);
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_after_shutdown_fail() {
        let (handle, _buffers, _store) = setup(config());
        handle.shutdown().await;

        assert_eq!(handle.request_sync().await, Err(SchedulerError::Stopped));
        assert_eq!(handle.buffer_changed().await, Err(SchedulerError::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_debounce() {
        let (handle, buffers, store) = setup(config());
        handle.request_sync().await.unwrap();

        buffers.copy("unsent");
        handle.buffer_changed().await.unwrap();
        handle.shutdown().await;
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.calls(StoreOp::Put), 0);
    }
}
