//! Transactional dependency mutation.
//!
//! `add_dependency` and `remove_dependency` couple three effects — the
//! edge row, the dependent's status propagation, and its recomputed
//! depth and priority — inside one store transaction. The in-memory
//! graph is mutated first (under the engine's graph lock, so nothing
//! observes the intermediate state) and unwound if the transaction
//! fails, leaving both views exactly as they were.

use crate::core::priority::calculated_priority;
use crate::core::task::{TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::llog;
use crate::orchestration::Engine;
use crate::store::{
    delete_edge_internal, get_task_internal, insert_edge_internal, prerequisite_statuses_internal,
    update_task_internal,
};
use chrono::Utc;
use serde::Serialize;

/// Contract returned to callers after a successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub status_changed: bool,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub new_priority: f64,
}

impl Engine {
    /// Add a dependency edge: `dependent` will require `prerequisite`.
    ///
    /// Validations run in increasing cost order (existence, self-edge,
    /// duplicate, cycle) and reject before any mutation. On success the
    /// edge is persisted together with the status propagation (a ready
    /// dependent gaining an unmet prerequisite becomes blocked) and the
    /// dependent's recomputed depth and priority.
    pub fn add_dependency(
        &self,
        dependent: TaskId,
        prerequisite: TaskId,
    ) -> Result<MutationOutcome> {
        let mut graph = self.graph_lock()?;
        graph.add_edge(dependent, prerequisite)?;

        let result = (|| -> Result<MutationOutcome> {
            let depth = graph.dependency_depth(&dependent)?;
            let weights = self.weights();
            self.store().transaction(|tx| {
                let mut task = get_task_internal(tx, &dependent)?
                    .ok_or(Error::TaskNotFound { id: dependent })?;
                let prereq = get_task_internal(tx, &prerequisite)?
                    .ok_or(Error::TaskNotFound { id: prerequisite })?;

                insert_edge_internal(tx, &dependent, &prerequisite, Utc::now())?;

                let old_status = task.status;
                let mut status_changed = false;
                if task.status == TaskStatus::Ready && prereq.status != TaskStatus::Completed {
                    task.transition(TaskStatus::Blocked)?;
                    status_changed = true;
                }

                task.dependency_depth = depth;
                task.calculated_priority = calculated_priority(
                    task.base_priority,
                    depth,
                    task.deadline,
                    Utc::now(),
                    weights,
                );
                update_task_internal(tx, &task)?;

                Ok(MutationOutcome {
                    status_changed,
                    old_status,
                    new_status: task.status,
                    new_priority: task.calculated_priority,
                })
            })
        })();

        match result {
            Ok(outcome) => {
                llog!(
                    "dependency added: {} -> {} ({} -> {})",
                    dependent.short(),
                    prerequisite.short(),
                    outcome.old_status,
                    outcome.new_status
                );
                Ok(outcome)
            }
            Err(e) => {
                let _ = graph.remove_edge(dependent, prerequisite);
                Err(e)
            }
        }
    }

    /// Remove a dependency edge.
    ///
    /// A blocked dependent whose remaining prerequisites are satisfied
    /// (per its dependency mode) is promoted to ready in the same
    /// transaction, and its depth and priority are recomputed.
    pub fn remove_dependency(
        &self,
        dependent: TaskId,
        prerequisite: TaskId,
    ) -> Result<MutationOutcome> {
        let mut graph = self.graph_lock()?;
        graph.remove_edge(dependent, prerequisite)?;

        let result = (|| -> Result<MutationOutcome> {
            let depth = graph.dependency_depth(&dependent)?;
            let weights = self.weights();
            self.store().transaction(|tx| {
                let mut task = get_task_internal(tx, &dependent)?
                    .ok_or(Error::TaskNotFound { id: dependent })?;

                let removed = delete_edge_internal(tx, &dependent, &prerequisite)?;
                if removed == 0 {
                    return Err(Error::DependencyNotFound {
                        dependent,
                        prerequisite,
                    });
                }

                let old_status = task.status;
                let mut status_changed = false;
                if task.status == TaskStatus::Blocked {
                    let statuses: Vec<TaskStatus> = prerequisite_statuses_internal(tx, &dependent)?
                        .into_iter()
                        .map(|(_, status)| status)
                        .collect();
                    if task.dependency_mode.prerequisites_met(&statuses) {
                        task.transition(TaskStatus::Ready)?;
                        status_changed = true;
                    }
                }

                task.dependency_depth = depth;
                task.calculated_priority = calculated_priority(
                    task.base_priority,
                    depth,
                    task.deadline,
                    Utc::now(),
                    weights,
                );
                update_task_internal(tx, &task)?;

                Ok(MutationOutcome {
                    status_changed,
                    old_status,
                    new_status: task.status,
                    new_priority: task.calculated_priority,
                })
            })
        })();

        match result {
            Ok(outcome) => {
                llog!(
                    "dependency removed: {} -> {} ({} -> {})",
                    dependent.short(),
                    prerequisite.short(),
                    outcome.old_status,
                    outcome.new_status
                );
                Ok(outcome)
            }
            Err(e) => {
                graph.restore_edge(dependent, prerequisite);
                Err(e)
            }
        }
    }
}
