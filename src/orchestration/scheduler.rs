//! Concurrent dispatch of ready tasks to executors.
//!
//! The scheduler runs four cooperating loops: a dispatch loop that
//! acquires an admission permit and hands the highest-ranked ready task
//! to an executor, a single status consumer that applies completion and
//! failure reports (serializing all graph mutations), a promotion sweep
//! that catches dependents whose readiness was missed, and a resource
//! sweep that pauses admission when the status channel backs up.
//! Suspension happens only at permit acquisition and channel receive.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::{Engine, ExecutionOutcome};
use crate::{llog, llog_debug, llog_error, llog_warn};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How long the dispatch loop sleeps when nothing is ready.
const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Executes one task and reports its outcome.
///
/// Implemented by the external executor-launch collaborator; the
/// scheduler only hands over the task record and consumes the outcome.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: Task) -> ExecutionOutcome;
}

/// A completion or failure report travelling from an executor to the
/// status consumer.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub outcome: ExecutionOutcome,
}

/// Events emitted by the scheduler for task lifecycle changes.
///
/// These let external components (UI, logs) react to state changes
/// without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task was handed to an executor.
    TaskDispatched { task_id: TaskId },
    /// A task completed; `promoted` lists dependents that became ready.
    TaskCompleted {
        task_id: TaskId,
        promoted: Vec<TaskId>,
    },
    /// A task failed with no retries remaining.
    TaskFailed { task_id: TaskId, error: String },
    /// A failed attempt was re-queued for another try.
    TaskRetried { task_id: TaskId },
    /// No non-terminal tasks remain.
    AllTasksSettled,
}

/// Bounded dispatch loop over the engine's ready queue.
pub struct Scheduler {
    engine: Arc<Engine>,
    executor: Arc<dyn TaskExecutor>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
    admission_paused: Arc<AtomicBool>,
    status_tx: mpsc::Sender<StatusUpdate>,
    status_rx: Option<mpsc::Receiver<StatusUpdate>>,
    loops: Vec<JoinHandle<()>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Create a scheduler over an engine and an executor.
    ///
    /// Capacity and channel bounds come from the engine's config.
    pub fn new(
        engine: Arc<Engine>,
        executor: Arc<dyn TaskExecutor>,
        event_tx: mpsc::Sender<SchedulerEvent>,
    ) -> Self {
        let max_agents = engine.config().max_agents.max(1);
        let capacity = engine.config().status_channel_capacity.max(1);
        let (status_tx, status_rx) = mpsc::channel(capacity);
        Self {
            permits: Arc::new(Semaphore::new(max_agents)),
            engine,
            executor,
            event_tx,
            cancel: CancellationToken::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            admission_paused: Arc::new(AtomicBool::new(false)),
            status_tx,
            status_rx: Some(status_rx),
            loops: Vec::new(),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sender half of the status-update channel.
    ///
    /// External collaborators report out-of-band completions through
    /// this, sharing the single consumer with dispatched executors.
    pub fn status_sender(&self) -> mpsc::Sender<StatusUpdate> {
        self.status_tx.clone()
    }

    /// Token observed by every loop; cancelling it begins shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the dispatch, consumer, and watcher loops.
    pub fn start(&mut self) -> Result<()> {
        let status_rx = self.status_rx.take().ok_or(Error::SchedulerAlreadyStarted)?;
        let config = self.engine.config();

        self.loops.push(tokio::spawn(dispatch_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.executor),
            Arc::clone(&self.permits),
            self.status_tx.clone(),
            self.event_tx.clone(),
            Arc::clone(&self.in_flight),
            Arc::clone(&self.admission_paused),
            Arc::clone(&self.workers),
            self.cancel.clone(),
        )));
        self.loops.push(tokio::spawn(status_loop(
            Arc::clone(&self.engine),
            self.event_tx.clone(),
            Arc::clone(&self.in_flight),
            status_rx,
            self.cancel.clone(),
        )));
        self.loops.push(tokio::spawn(promote_loop(
            Arc::clone(&self.engine),
            config.promote_sweep_interval(),
            self.cancel.clone(),
        )));
        self.loops.push(tokio::spawn(resource_loop(
            self.status_tx.clone(),
            Arc::clone(&self.admission_paused),
            config.resource_sweep_interval(),
            self.cancel.clone(),
        )));

        llog!("scheduler started (max_agents {})", config.max_agents);
        Ok(())
    }

    /// Stop all loops, bounded by the configured grace period.
    ///
    /// Loops finish in-flight work and drain their share of the status
    /// channel. Whatever has not exited when the grace period runs out
    /// is aborted, and `Error::Timeout` reports the forced stop.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        let grace = self.engine.config().shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0usize;

        for mut handle in self.loops.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }

        // The dispatch loop has exited, so no new executors can appear.
        let outstanding: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for mut handle in outstanding {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            llog_warn!(
                "scheduler shutdown forced after {:?}: {} task(s) aborted",
                grace,
                aborted
            );
            return Err(Error::Timeout(grace));
        }
        llog!("scheduler stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &!self.loops.is_empty())
            .finish_non_exhaustive()
    }
}

/// Claim the highest-ranked ready task not already dispatched.
///
/// The in-flight guard is held across the claim so two dispatch polls
/// can never start the same task.
fn claim_next(engine: &Engine, in_flight: &Mutex<HashSet<TaskId>>) -> Result<Option<Task>> {
    let ready = engine.ready_tasks()?;
    let mut held = in_flight
        .lock()
        .map_err(|e| Error::LockPoisoned(e.to_string()))?;
    for task in ready {
        if held.contains(&task.id) {
            continue;
        }
        let started = engine.start_task(task.id)?;
        held.insert(started.id);
        return Ok(Some(started));
    }
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
    engine: Arc<Engine>,
    executor: Arc<dyn TaskExecutor>,
    permits: Arc<Semaphore>,
    status_tx: mpsc::Sender<StatusUpdate>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
    admission_paused: Arc<AtomicBool>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if admission_paused.load(Ordering::Relaxed) {
            drop(permit);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(DISPATCH_POLL) => {}
            }
            continue;
        }

        let next = match claim_next(&engine, &in_flight) {
            Ok(next) => next,
            Err(e) => {
                llog_error!("dispatch claim failed: {}", e);
                None
            }
        };
        let Some(task) = next else {
            drop(permit);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(DISPATCH_POLL) => {}
            }
            continue;
        };

        llog!(
            "dispatching task {} (priority {:.1})",
            task.id.short(),
            task.calculated_priority
        );
        let _ = event_tx
            .send(SchedulerEvent::TaskDispatched { task_id: task.id })
            .await;

        let executor = Arc::clone(&executor);
        let status_tx = status_tx.clone();
        let handle = tokio::spawn(async move {
            // The permit rides along and frees a slot when the
            // executor finishes, reported or not.
            let _permit = permit;
            let task_id = task.id;
            let outcome = executor.execute(task).await;
            let _ = status_tx.send(StatusUpdate { task_id, outcome }).await;
        });
        if let Ok(mut workers) = workers.lock() {
            workers.retain(|h| !h.is_finished());
            workers.push(handle);
        }
    }
}

async fn status_loop(
    engine: Arc<Engine>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
    mut status_rx: mpsc::Receiver<StatusUpdate>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = status_rx.recv() => match update {
                Some(update) => update,
                None => return,
            },
        };
        apply_update(&engine, &event_tx, &in_flight, update).await;
    }

    // Drain what executors managed to report before the stop signal.
    while let Ok(update) = status_rx.try_recv() {
        apply_update(&engine, &event_tx, &in_flight, update).await;
    }
}

async fn apply_update(
    engine: &Engine,
    event_tx: &mpsc::Sender<SchedulerEvent>,
    in_flight: &Mutex<HashSet<TaskId>>,
    update: StatusUpdate,
) {
    let StatusUpdate { task_id, outcome } = update;
    let failure_error = match &outcome {
        ExecutionOutcome::Failed { error } => Some(error.clone()),
        ExecutionOutcome::Completed => None,
    };

    let result = engine.report_completion(task_id, outcome);
    if let Ok(mut held) = in_flight.lock() {
        held.remove(&task_id);
    }

    let completion = match result {
        Ok(completion) => completion,
        Err(e) => {
            llog_error!("status update for {} failed: {}", task_id.short(), e);
            return;
        }
    };

    let event = if completion.retried {
        SchedulerEvent::TaskRetried { task_id }
    } else {
        match completion.final_status {
            TaskStatus::Completed => SchedulerEvent::TaskCompleted {
                task_id,
                promoted: completion.promoted,
            },
            TaskStatus::Failed => SchedulerEvent::TaskFailed {
                task_id,
                error: failure_error.unwrap_or_default(),
            },
            other => {
                llog_warn!(
                    "unexpected post-report status {} for {}",
                    other,
                    task_id.short()
                );
                return;
            }
        }
    };
    let _ = event_tx.send(event).await;

    match engine.active_count() {
        Ok(0) => {
            let _ = event_tx.send(SchedulerEvent::AllTasksSettled).await;
        }
        Ok(_) => {}
        Err(e) => llog_error!("active count failed: {}", e),
    }
}

/// Periodic sweep promoting pending tasks whose prerequisites became
/// satisfied outside the synchronous propagation path.
async fn promote_loop(engine: Arc<Engine>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match engine.promote_pending() {
                Ok(promoted) if !promoted.is_empty() => {
                    llog_debug!("promotion sweep readied {} task(s)", promoted.len());
                }
                Ok(_) => {}
                Err(e) => llog_error!("promotion sweep failed: {}", e),
            },
        }
    }
}

/// Coarser sweep that pauses admission while the status channel is
/// more than half full, resuming once the consumer catches up.
async fn resource_loop(
    status_tx: mpsc::Sender<StatusUpdate>,
    admission_paused: Arc<AtomicBool>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let total = status_tx.max_capacity();
                let backlog = total - status_tx.capacity();
                let paused = backlog > total / 2;
                let was = admission_paused.swap(paused, Ordering::Relaxed);
                if paused && !was {
                    llog_warn!("admission paused: status backlog {}/{}", backlog, total);
                } else if !paused && was {
                    llog!("admission resumed");
                }
            }
        }
    }
}
