//! Orchestration layer: the engine facade, transactional graph
//! mutation, maintenance pruning, and the concurrent scheduler.
//!
//! `Engine` is the narrow API surface external callers consume. Every
//! mutating operation couples its effects (edge rows, status rows,
//! derived priority) inside one store transaction, and holds the graph
//! lock for its whole duration so two mutations never interleave.

mod mutator;
mod prune;
mod scheduler;

pub use mutator::MutationOutcome;
pub use prune::{PrunePolicy, PruneReport};
pub use scheduler::{Scheduler, SchedulerEvent, StatusUpdate, TaskExecutor};

use crate::config::EngineConfig;
use crate::core::graph::{audit_edges, DagViolation, DependencyGraph};
use crate::core::priority::{calculated_priority, PriorityWeights};
use crate::core::task::{Task, TaskId, TaskSpec, TaskStatus};
use crate::error::{Error, Result};
use crate::store::{
    dependent_statuses_internal, get_task_internal, insert_edge_internal, insert_task_internal,
    prerequisite_statuses_internal, resolve_edges_internal, update_task_internal, Archive,
    TaskStore,
};
use crate::{llog, llog_debug};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Result reported by an executor for a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed { error: String },
}

/// Effects of applying a completion or failure report.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    /// Status the reported task ended up in.
    pub final_status: TaskStatus,
    /// Whether a failed attempt was re-queued instead of finalized.
    pub retried: bool,
    /// Dependents promoted to ready by this completion.
    pub promoted: Vec<TaskId>,
}

/// The dependency-aware scheduling engine.
///
/// Owns the persistent store, the in-memory graph view, and the
/// priority weights. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct Engine {
    store: TaskStore,
    graph: Mutex<DependencyGraph>,
    weights: PriorityWeights,
    archive: Archive,
    config: EngineConfig,
}

impl Engine {
    /// Open the engine against the configured database file.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.ensure_dirs()?;
        crate::log::init(&config.data_dir()?);
        let store = TaskStore::open(&config.db_path()?)?;
        Self::with_store(store, config)
    }

    /// Open an engine backed by an in-memory store.
    ///
    /// The archive log still lands at the configured path.
    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        let store = TaskStore::open_in_memory()?;
        Self::with_store(store, config)
    }

    fn with_store(store: TaskStore, config: EngineConfig) -> Result<Self> {
        let weights = PriorityWeights {
            depth_weight: config.depth_weight,
            deadline_horizon_hours: config.deadline_horizon_hours,
            deadline_boost: config.deadline_boost,
        };
        let archive = Archive::new(config.archive_path()?);
        let engine = Self {
            store,
            graph: Mutex::new(DependencyGraph::new()),
            weights,
            archive,
            config,
        };
        engine.hydrate()?;
        Ok(engine)
    }

    /// Rebuild the in-memory graph view from persisted rows.
    ///
    /// Rows were validated when written; anything that slipped past
    /// (orphans, cycles) is surfaced by the audit, not repaired here.
    fn hydrate(&self) -> Result<()> {
        let tasks = self.store.all_tasks()?;
        let edges = self.store.all_edges()?;
        let mut graph = self.graph_lock()?;
        for task in &tasks {
            graph.insert_node(task.id);
        }
        for edge in &edges {
            graph.insert_edge_unchecked(edge.dependent, edge.prerequisite);
        }
        llog_debug!(
            "engine hydrated: {} task(s), {} edge(s)",
            tasks.len(),
            edges.len()
        );
        Ok(())
    }

    pub(crate) fn graph_lock(&self) -> Result<MutexGuard<'_, DependencyGraph>> {
        self.graph
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))
    }

    pub(crate) fn store(&self) -> &TaskStore {
        &self.store
    }

    pub(crate) fn weights(&self) -> &PriorityWeights {
        &self.weights
    }

    pub(crate) fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a new task.
    ///
    /// Validates the spec, records the task together with its
    /// prerequisite edges in one transaction, and resolves the initial
    /// status: ready when the prerequisites are already satisfied,
    /// blocked otherwise.
    pub fn submit_task(&self, spec: &TaskSpec) -> Result<TaskId> {
        let mut task = Task::from_spec(spec)?;
        let mut graph = self.graph_lock()?;

        // Memory first: node plus validated edges. Any rejection or a
        // later store failure unwinds the whole insertion.
        graph.insert_node(task.id);
        let mut linked: Vec<TaskId> = Vec::new();
        let mut link_edges = || -> Result<()> {
            for prerequisite in &spec.prerequisites {
                graph.add_edge(task.id, *prerequisite)?;
                linked.push(*prerequisite);
            }
            let depth = graph.dependency_depth(&task.id)?;
            task.dependency_depth = depth;
            task.calculated_priority = calculated_priority(
                task.base_priority,
                depth,
                task.deadline,
                Utc::now(),
                &self.weights,
            );
            Ok(())
        };
        if let Err(e) = link_edges() {
            for prerequisite in linked {
                let _ = graph.remove_edge(task.id, prerequisite);
            }
            graph.remove_node(&task.id);
            return Err(e);
        }

        let task_ref = &mut task;
        let weights = &self.weights;
        let result = self.store.transaction(|tx| {
            insert_task_internal(tx, task_ref)?;
            let now = Utc::now();
            for prerequisite in &spec.prerequisites {
                insert_edge_internal(tx, &task_ref.id, prerequisite, now)?;
            }
            let statuses: Vec<TaskStatus> = prerequisite_statuses_internal(tx, &task_ref.id)?
                .into_iter()
                .map(|(_, status)| status)
                .collect();
            let target = if task_ref.dependency_mode.prerequisites_met(&statuses) {
                TaskStatus::Ready
            } else {
                TaskStatus::Blocked
            };
            task_ref.transition(target)?;
            task_ref.calculated_priority = calculated_priority(
                task_ref.base_priority,
                task_ref.dependency_depth,
                task_ref.deadline,
                now,
                weights,
            );
            update_task_internal(tx, task_ref)?;
            Ok(())
        });

        match result {
            Ok(()) => {
                llog!(
                    "task {} submitted ({}, priority {:.1})",
                    task.id.short(),
                    task.status,
                    task.calculated_priority
                );
                Ok(task.id)
            }
            Err(e) => {
                for prerequisite in &spec.prerequisites {
                    let _ = graph.remove_edge(task.id, *prerequisite);
                }
                graph.remove_node(&task.id);
                Err(e)
            }
        }
    }

    /// Fetch a task by id.
    pub fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        self.store.get_task(id)
    }

    /// The highest-ranked ready task, if any.
    pub fn next_ready_task(&self) -> Result<Option<Task>> {
        Ok(self.store.ready_tasks()?.into_iter().next())
    }

    /// All ready tasks in dispatch order.
    pub fn ready_tasks(&self) -> Result<Vec<Task>> {
        self.store.ready_tasks()
    }

    /// Count of tasks not yet in a terminal state.
    pub fn active_count(&self) -> Result<usize> {
        self.store.active_count()
    }

    /// Count of tasks per lifecycle status.
    pub fn task_counts(&self) -> Result<HashMap<TaskStatus, usize>> {
        self.store.status_counts()
    }

    /// Move a ready task into execution.
    pub fn start_task(&self, id: TaskId) -> Result<Task> {
        let _graph = self.graph_lock()?;
        self.store.transaction(|tx| {
            let mut task = get_task_internal(tx, &id)?.ok_or(Error::TaskNotFound { id })?;
            task.transition(TaskStatus::Running)?;
            update_task_internal(tx, &task)?;
            Ok(task)
        })
    }

    /// Apply an executor's completion or failure report.
    ///
    /// A completion resolves the task's incoming edges and promotes any
    /// dependent whose prerequisites are now satisfied, all in one
    /// transaction. A failure re-queues the task while retries remain,
    /// else finalizes it as failed.
    pub fn report_completion(
        &self,
        id: TaskId,
        outcome: ExecutionOutcome,
    ) -> Result<CompletionOutcome> {
        // Held for the duration so completion propagation never
        // interleaves with an edge mutation.
        let _graph = self.graph_lock()?;
        match outcome {
            ExecutionOutcome::Completed => self.store.transaction(|tx| {
                let mut task = get_task_internal(tx, &id)?.ok_or(Error::TaskNotFound { id })?;
                task.transition(TaskStatus::Completed)?;
                update_task_internal(tx, &task)?;
                resolve_edges_internal(tx, &id, Utc::now())?;

                let mut promoted = Vec::new();
                for (dep_id, dep_status) in dependent_statuses_internal(tx, &id)? {
                    if !matches!(dep_status, TaskStatus::Pending | TaskStatus::Blocked) {
                        continue;
                    }
                    let mut dependent = get_task_internal(tx, &dep_id)?
                        .ok_or(Error::TaskNotFound { id: dep_id })?;
                    let statuses: Vec<TaskStatus> = prerequisite_statuses_internal(tx, &dep_id)?
                        .into_iter()
                        .map(|(_, status)| status)
                        .collect();
                    if dependent.dependency_mode.prerequisites_met(&statuses) {
                        dependent.transition(TaskStatus::Ready)?;
                        update_task_internal(tx, &dependent)?;
                        promoted.push(dep_id);
                    }
                }
                Ok(CompletionOutcome {
                    final_status: TaskStatus::Completed,
                    retried: false,
                    promoted,
                })
            }),
            ExecutionOutcome::Failed { error } => self.store.transaction(|tx| {
                let mut task = get_task_internal(tx, &id)?.ok_or(Error::TaskNotFound { id })?;
                let retried = task.record_failure(&error)?;
                update_task_internal(tx, &task)?;
                Ok(CompletionOutcome {
                    final_status: task.status,
                    retried,
                    promoted: Vec::new(),
                })
            }),
        }
    }

    /// Cancel a non-terminal task.
    pub fn cancel_task(&self, id: TaskId) -> Result<TaskStatus> {
        let _graph = self.graph_lock()?;
        self.store.transaction(|tx| {
            let mut task = get_task_internal(tx, &id)?.ok_or(Error::TaskNotFound { id })?;
            task.transition(TaskStatus::Cancelled)?;
            update_task_internal(tx, &task)?;
            Ok(task.status)
        })
    }

    /// Promote pending tasks whose prerequisites became satisfied
    /// outside the synchronous propagation path.
    ///
    /// This is the periodic sweep's entry point; it is also safe to
    /// call ad hoc.
    pub fn promote_pending(&self) -> Result<Vec<TaskId>> {
        let _graph = self.graph_lock()?;
        self.store.transaction(|tx| {
            let mut promoted = Vec::new();
            let mut stmt = tx.prepare("SELECT * FROM tasks WHERE status = 'pending'")?;
            let rows = stmt.query_map([], crate::store::task_from_row)?;
            let mut pending = Vec::new();
            for row in rows {
                pending.push(row?);
            }
            drop(stmt);

            for mut task in pending {
                let statuses: Vec<TaskStatus> = prerequisite_statuses_internal(tx, &task.id)?
                    .into_iter()
                    .map(|(_, status)| status)
                    .collect();
                if task.dependency_mode.prerequisites_met(&statuses) {
                    task.transition(TaskStatus::Ready)?;
                    update_task_internal(tx, &task)?;
                    promoted.push(task.id);
                }
            }
            Ok(promoted)
        })
    }

    /// Full-graph integrity audit over persisted rows.
    ///
    /// Read-only: violations are reported for an operator to act on.
    pub fn validate_dag_integrity(&self) -> Result<Vec<DagViolation>> {
        let task_ids = self.store.task_ids()?;
        let edges: Vec<(TaskId, TaskId)> = self
            .store
            .all_edges()?
            .into_iter()
            .map(|e| (e.dependent, e.prerequisite))
            .collect();
        Ok(audit_edges(&task_ids, &edges))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("max_agents", &self.config.max_agents)
            .finish_non_exhaustive()
    }
}
