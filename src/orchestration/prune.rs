//! Maintenance engine for policy-driven task pruning.
//!
//! Pruning is the only path that destroys tasks. A policy selects
//! terminal tasks by status and age, safety toggles subtract tasks that
//! are still load-bearing, and the survivors are archived to the
//! durable log before their rows are deleted, all inside one store
//! transaction.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::llog;
use crate::orchestration::Engine;
use crate::store::{
    delete_edges_touching_internal, delete_task_internal, dependent_statuses_internal,
    edges_touching_internal, ArchivedTask,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minimum age threshold a policy may specify, in days.
pub const MIN_PRUNE_AGE_DAYS: u32 = 1;
/// Maximum age threshold a policy may specify, in days.
pub const MAX_PRUNE_AGE_DAYS: u32 = 3650;

/// Selection rules for a pruning pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrunePolicy {
    /// Terminal statuses eligible for deletion.
    pub statuses: Vec<TaskStatus>,
    /// Only tasks whose terminal timestamp is at least this old qualify.
    pub older_than_days: u32,
    /// Keep tasks that still have a non-terminal dependent.
    pub preserve_with_active_dependents: bool,
    /// Keep tasks modified within this many recent days, when set.
    pub preserve_recent_days: Option<u32>,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            statuses: vec![
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ],
            older_than_days: 30,
            preserve_with_active_dependents: true,
            preserve_recent_days: Some(7),
        }
    }
}

impl PrunePolicy {
    /// Check the policy bounds before anything is selected.
    pub fn validate(&self) -> Result<()> {
        if self.older_than_days < MIN_PRUNE_AGE_DAYS || self.older_than_days > MAX_PRUNE_AGE_DAYS {
            return Err(Error::InvalidPolicy(format!(
                "older_than_days {} out of range ({}-{})",
                self.older_than_days, MIN_PRUNE_AGE_DAYS, MAX_PRUNE_AGE_DAYS
            )));
        }
        if self.statuses.is_empty() {
            return Err(Error::InvalidPolicy("no statuses selected".to_string()));
        }
        if let Some(status) = self.statuses.iter().find(|s| !s.is_terminal()) {
            return Err(Error::InvalidPolicy(format!(
                "status {} is not terminal",
                status
            )));
        }
        if let Some(days) = self.preserve_recent_days {
            if days < MIN_PRUNE_AGE_DAYS || days > MAX_PRUNE_AGE_DAYS {
                return Err(Error::InvalidPolicy(format!(
                    "preserve_recent_days {} out of range ({}-{})",
                    days, MIN_PRUNE_AGE_DAYS, MAX_PRUNE_AGE_DAYS
                )));
            }
        }
        Ok(())
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.older_than_days as i64)
    }
}

/// Report of a pruning pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    /// Tasks the policy selected for deletion.
    pub identified: Vec<TaskId>,
    /// Candidates kept because a dependent is still active.
    pub preserved_for_dependents: Vec<TaskId>,
    /// Candidates kept because they were modified recently.
    pub preserved_recent: Vec<TaskId>,
    /// Tasks written to the archive log.
    pub archived: Vec<TaskId>,
    /// Tasks actually deleted.
    pub deleted: Vec<TaskId>,
    /// Whether this pass was a preview only.
    pub dry_run: bool,
}

impl PruneReport {
    pub fn identified_count(&self) -> usize {
        self.identified.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn preserved_count(&self) -> usize {
        self.preserved_for_dependents.len() + self.preserved_recent.len()
    }

    /// Whether nothing qualified for deletion.
    pub fn is_noop(&self) -> bool {
        self.identified.is_empty()
    }

    /// Whether every identified task was deleted (trivially true for a
    /// dry run).
    pub fn is_success(&self) -> bool {
        self.dry_run || self.deleted.len() == self.identified.len()
    }
}

impl Engine {
    /// Prune terminal tasks matching a policy.
    ///
    /// Selection: tasks in the policy's statuses whose terminal
    /// timestamp is past the age threshold, minus tasks shielded by the
    /// safety toggles. With `dry_run` the report describes what would
    /// be deleted and nothing changes. Otherwise one transaction
    /// archives each survivor with its edges, deletes the edges, then
    /// deletes the tasks; any failure rolls the whole pass back.
    pub fn prune_tasks_by_policy(
        &self,
        policy: &PrunePolicy,
        dry_run: bool,
    ) -> Result<PruneReport> {
        policy.validate()?;
        let mut graph = self.graph_lock()?;

        let now = Utc::now();
        let candidates = self.store().prunable_tasks(&policy.statuses, policy.cutoff(now))?;

        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };
        let mut selected: Vec<Task> = Vec::new();
        for task in candidates {
            if policy.preserve_with_active_dependents {
                let dependents = self
                    .store()
                    .with_conn(|conn| dependent_statuses_internal(conn, &task.id))?;
                if dependents.iter().any(|(_, status)| !status.is_terminal()) {
                    report.preserved_for_dependents.push(task.id);
                    continue;
                }
            }
            if let Some(days) = policy.preserve_recent_days {
                if task.updated_at > now - Duration::days(days as i64) {
                    report.preserved_recent.push(task.id);
                    continue;
                }
            }
            selected.push(task);
        }
        report.identified = selected.iter().map(|t| t.id).collect();

        if dry_run {
            llog!(
                "prune dry run: {} candidate(s), {} preserved",
                report.identified_count(),
                report.preserved_count()
            );
            return Ok(report);
        }
        if selected.is_empty() {
            return Ok(report);
        }

        let archive = self.archive();
        self.store().transaction(|tx| {
            let mut records = Vec::with_capacity(selected.len());
            for task in &selected {
                let edges = edges_touching_internal(tx, &task.id)?;
                records.push(ArchivedTask::new(task.clone(), edges));
            }
            // Archive lines land before any row is touched; edges go
            // before tasks for referential-integrity ordering.
            archive.append_all(&records)?;
            for task in &selected {
                delete_edges_touching_internal(tx, &task.id)?;
            }
            for task in &selected {
                delete_task_internal(tx, &task.id)?;
            }
            Ok(())
        })?;

        for id in &report.identified {
            graph.remove_node(id);
        }
        report.archived = report.identified.clone();
        report.deleted = report.identified.clone();
        llog!(
            "pruned {} task(s), archive at {}",
            report.deleted_count(),
            archive.path().display()
        );
        Ok(report)
    }
}
