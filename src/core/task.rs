//! Task data model and lifecycle state machine.
//!
//! Tasks are the atomic units of schedulable work. Each task tracks its
//! status, base and derived priority, position in the dependency graph,
//! retry budget, and timing.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Maximum length of a task summary, in characters.
pub const MAX_SUMMARY_LEN: usize = 140;

/// Error for enum tags persisted as text that fail to parse back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError(pub String);

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseEnumError {}

/// Maximum user-supplied base priority.
pub const MAX_BASE_PRIORITY: u8 = 10;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of executor a task targets.
///
/// The engine only carries the tag; resolving it to a concrete worker
/// is the launch collaborator's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// An autonomous AI worker.
    Agent,
    /// A shell command runner.
    Shell,
    /// Work routed to a person.
    Human,
}

impl Default for ExecutorKind {
    fn default() -> Self {
        Self::Agent
    }
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Agent => "agent",
            ExecutorKind::Shell => "shell",
            ExecutorKind::Human => "human",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "agent" => Ok(ExecutorKind::Agent),
            "shell" => Ok(ExecutorKind::Shell),
            "human" => Ok(ExecutorKind::Human),
            other => Err(ParseEnumError(format!("unknown executor kind: {}", other))),
        }
    }
}

/// How a task's prerequisites combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyMode {
    /// Every prerequisite must be completed (sequential).
    All,
    /// Any single completed prerequisite suffices (parallel).
    Any,
}

impl Default for DependencyMode {
    fn default() -> Self {
        Self::All
    }
}

impl DependencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyMode::All => "all",
            DependencyMode::Any => "any",
        }
    }

    /// Whether a set of prerequisite statuses satisfies this mode.
    ///
    /// An empty prerequisite set is trivially satisfied in both modes.
    pub fn prerequisites_met(&self, statuses: &[TaskStatus]) -> bool {
        if statuses.is_empty() {
            return true;
        }
        match self {
            DependencyMode::All => statuses.iter().all(|s| *s == TaskStatus::Completed),
            DependencyMode::Any => statuses.iter().any(|s| *s == TaskStatus::Completed),
        }
    }
}

impl std::fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DependencyMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(DependencyMode::All),
            "any" => Ok(DependencyMode::Any),
            other => Err(ParseEnumError(format!(
                "unknown dependency mode: {}",
                other
            ))),
        }
    }
}

/// Task status in its lifecycle.
///
/// `Ready <-> Blocked` moves are never requested by callers directly;
/// they are side effects of dependency-graph mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not yet resolved to ready/blocked.
    Pending,
    /// Dependencies satisfied, eligible for dispatch.
    Ready,
    /// At least one prerequisite (per the task's mode) is unmet.
    Blocked,
    /// Task is currently being executed.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with no retries remaining.
    Failed,
    /// Task was cancelled before completion.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Central transition legality table.
    ///
    /// `Running -> Ready` covers re-queueing a failed attempt that still
    /// has retries left.
    pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (from, to) {
            (Pending, Ready) | (Pending, Blocked) => true,
            (Blocked, Ready) => true,
            (Ready, Running) | (Ready, Blocked) => true,
            (Running, Completed) | (Running, Failed) | (Running, Ready) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "ready" => Ok(TaskStatus::Ready),
            "blocked" => Ok(TaskStatus::Blocked),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ParseEnumError(format!("unknown task status: {}", other))),
        }
    }
}

/// Caller-supplied description of a task to submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Human-readable summary (at most [`MAX_SUMMARY_LEN`] characters).
    pub summary: String,
    /// Free-form description of the work.
    pub description: String,
    /// Target executor kind.
    #[serde(default)]
    pub executor: ExecutorKind,
    /// User-supplied priority in `0..=10`.
    pub base_priority: u8,
    /// How prerequisites combine.
    #[serde(default)]
    pub dependency_mode: DependencyMode,
    /// Tasks that must complete before this one may run.
    #[serde(default)]
    pub prerequisites: Vec<TaskId>,
    /// Optional hierarchical parent.
    pub parent_id: Option<TaskId>,
    /// Optional deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Retry budget for failed executions.
    #[serde(default)]
    pub max_retries: u32,
    /// Optional branch metadata.
    pub branch_name: Option<String>,
    /// Optional workspace metadata.
    pub workspace_path: Option<PathBuf>,
}

impl TaskSpec {
    /// Create a minimal spec with medium priority and no prerequisites.
    pub fn new(summary: &str, description: &str) -> Self {
        Self {
            summary: summary.to_string(),
            description: description.to_string(),
            executor: ExecutorKind::default(),
            base_priority: 5,
            dependency_mode: DependencyMode::default(),
            prerequisites: Vec::new(),
            parent_id: None,
            deadline: None,
            max_retries: 0,
            branch_name: None,
            workspace_path: None,
        }
    }

    /// Set the base priority (builder style).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.base_priority = priority;
        self
    }

    /// Add prerequisite task ids (builder style).
    pub fn with_prerequisites(mut self, prerequisites: Vec<TaskId>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    /// Set the dependency mode (builder style).
    pub fn with_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = mode;
        self
    }

    /// Set a deadline (builder style).
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the retry budget (builder style).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A task record as persisted and scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable summary.
    pub summary: String,
    /// Free-form description.
    pub description: String,
    /// Target executor kind.
    pub executor: ExecutorKind,
    /// User-supplied priority in `0..=10`.
    pub base_priority: u8,
    /// Derived ordering key; recomputed whenever depth or base changes.
    pub calculated_priority: f64,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// How prerequisites combine.
    pub dependency_mode: DependencyMode,
    /// Cached longest path to a dependency-free ancestor.
    pub dependency_depth: u32,
    /// Failed attempts so far.
    pub retries: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last modification of any field.
    pub updated_at: DateTime<Utc>,
    /// Optional hierarchical parent.
    pub parent_id: Option<TaskId>,
    /// Optional deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Optional branch metadata.
    pub branch_name: Option<String>,
    /// Optional workspace metadata.
    pub workspace_path: Option<PathBuf>,
}

impl Task {
    /// Build a task record from a validated spec.
    ///
    /// Rejects overlong summaries and out-of-range priorities. The
    /// returned task is `Pending` with depth 0; the submission path
    /// resolves status, depth, and priority against the graph.
    pub fn from_spec(spec: &TaskSpec) -> Result<Self> {
        if spec.summary.chars().count() > MAX_SUMMARY_LEN {
            return Err(Error::SummaryTooLong {
                len: spec.summary.chars().count(),
                max: MAX_SUMMARY_LEN,
            });
        }
        if spec.base_priority > MAX_BASE_PRIORITY {
            return Err(Error::InvalidPriority {
                value: spec.base_priority as i64,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            summary: spec.summary.clone(),
            description: spec.description.clone(),
            executor: spec.executor,
            base_priority: spec.base_priority,
            calculated_priority: spec.base_priority as f64,
            status: TaskStatus::Pending,
            dependency_mode: spec.dependency_mode,
            dependency_depth: 0,
            retries: 0,
            max_retries: spec.max_retries,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            parent_id: spec.parent_id,
            deadline: spec.deadline,
            last_error: None,
            branch_name: spec.branch_name.clone(),
            workspace_path: spec.workspace_path.clone(),
        })
    }

    /// Apply a status transition, enforcing the legality table.
    ///
    /// On success, `updated_at` is refreshed and the start/completion
    /// timestamps are maintained. An illegal transition returns
    /// `InvalidStateTransition` and mutates nothing.
    pub fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !TaskStatus::can_transition(self.status, to) {
            return Err(Error::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        match to {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a failed attempt and decide whether it may retry.
    ///
    /// Returns `true` when the task was re-queued (`Running -> Ready`),
    /// `false` when the failure was terminal (`Running -> Failed`).
    pub fn record_failure(&mut self, error: &str) -> Result<bool> {
        self.last_error = Some(error.to_string());
        if self.retries < self.max_retries {
            self.retries += 1;
            self.transition(TaskStatus::Ready)?;
            Ok(true)
        } else {
            self.transition(TaskStatus::Failed)?;
            Ok(false)
        }
    }
}
