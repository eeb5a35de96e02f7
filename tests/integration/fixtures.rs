//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Engines over temporary data directories
//! - Submitting small task graphs
//! - Mock executors and scheduler event collection

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

use lattice::{
    Engine, EngineConfig, ExecutionOutcome, Scheduler, SchedulerEvent, Task, TaskExecutor, TaskId,
    TaskSpec,
};

/// An engine whose data directory lives in a temp dir.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    /// Held so the data directory outlives the engine.
    #[allow(dead_code)]
    dir: TempDir,
}

impl TestEngine {
    /// In-memory store with default config.
    pub fn in_memory() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// In-memory store with the given config; the data dir is replaced
    /// by a temp dir.
    pub fn with_config(mut config: EngineConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        config.data_dir = Some(dir.path().to_string_lossy().into_owned());
        let engine = Arc::new(Engine::open_in_memory(config).expect("open engine"));
        Self { engine, dir }
    }

    /// Submit a task with the given priority and prerequisites.
    pub fn submit(&self, summary: &str, priority: u8, prerequisites: &[TaskId]) -> TaskId {
        self.engine
            .submit_task(
                &TaskSpec::new(summary, "integration test task")
                    .with_priority(priority)
                    .with_prerequisites(prerequisites.to_vec()),
            )
            .expect("submit task")
    }

    /// Drive a task through start and successful completion.
    pub fn complete(&self, id: TaskId) {
        self.engine.start_task(id).expect("start task");
        self.engine
            .report_completion(id, ExecutionOutcome::Completed)
            .expect("report completion");
    }

    /// Fetch a task that must exist.
    pub fn task(&self, id: TaskId) -> Task {
        self.engine
            .get_task(&id)
            .expect("get task")
            .expect("task exists")
    }
}

/// Build a scheduler over a test engine with a fresh event channel.
pub fn scheduler_for(
    test: &TestEngine,
    executor: Arc<dyn TaskExecutor>,
) -> (Scheduler, mpsc::Receiver<SchedulerEvent>) {
    let (event_tx, event_rx) = mpsc::channel(256);
    let scheduler = Scheduler::new(Arc::clone(&test.engine), executor, event_tx);
    (scheduler, event_rx)
}

/// Executor that records execution order and completes instantly.
pub struct RecordingExecutor {
    executed: Mutex<Vec<TaskId>>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn order(&self) -> Vec<TaskId> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: Task) -> ExecutionOutcome {
        self.executed.lock().unwrap().push(task.id);
        ExecutionOutcome::Completed
    }
}

/// Executor that fails every attempt.
pub struct FailingExecutor;

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn execute(&self, _task: Task) -> ExecutionOutcome {
        ExecutionOutcome::Failed {
            error: "injected failure".to_string(),
        }
    }
}

/// Collect scheduler events until `stop` matches one, bounded by a ten
/// second timeout per event.
pub async fn collect_until<F>(
    event_rx: &mut mpsc::Receiver<SchedulerEvent>,
    mut stop: F,
) -> Vec<SchedulerEvent>
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(10), event_rx.recv())
            .await
            .expect("timed out waiting for scheduler events")
            .expect("event channel closed");
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}
