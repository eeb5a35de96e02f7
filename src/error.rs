use crate::core::task::{TaskId, TaskStatus};
use thiserror::Error;

/// Render a cycle path as short ids joined with arrows.
fn fmt_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(|id| id.short())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Task {id} cannot depend on itself")]
    SelfDependency { id: TaskId },

    #[error("Dependency {dependent} -> {prerequisite} already exists")]
    DuplicateDependency {
        dependent: TaskId,
        prerequisite: TaskId,
    },

    #[error("Dependency {dependent} -> {prerequisite} would create a cycle: {}", fmt_cycle(.cycle))]
    CircularDependency {
        dependent: TaskId,
        prerequisite: TaskId,
        cycle: Vec<TaskId>,
    },

    #[error("Dependency {dependent} -> {prerequisite} not found")]
    DependencyNotFound {
        dependent: TaskId,
        prerequisite: TaskId,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    #[error("Base priority {value} out of range (0-10)")]
    InvalidPriority { value: i64 },

    #[error("Summary exceeds {max} characters (got {len})")]
    SummaryTooLong { len: usize, max: usize },

    #[error("Invalid prune policy: {0}")]
    InvalidPolicy(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Status channel closed")]
    ChannelClosed,

    #[error("Scheduler already started")]
    SchedulerAlreadyStarted,
}

pub type Result<T> = std::result::Result<T, Error>;
