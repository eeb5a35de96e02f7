pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod store;

pub use config::EngineConfig;
pub use core::graph::{DagViolation, Severity, ViolationKind};
pub use core::priority::{calculated_priority, PriorityWeights};
pub use core::task::{DependencyMode, ExecutorKind, Task, TaskId, TaskSpec, TaskStatus};
pub use error::{Error, Result};
pub use orchestration::{
    CompletionOutcome, Engine, ExecutionOutcome, MutationOutcome, PrunePolicy, PruneReport,
    Scheduler, SchedulerEvent, StatusUpdate, TaskExecutor,
};
pub use store::{ArchivedTask, EdgeRecord};
