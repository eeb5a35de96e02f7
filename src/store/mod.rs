//! SQLite-backed persistence for tasks and dependency edges.
//!
//! The store owns a single guarded connection: mutation paths run inside
//! `conn.transaction()?` so multi-statement operations commit or roll
//! back as a unit, and the connection mutex gives the serializable
//! isolation the engine's single-writer model assumes.

mod archive;

pub use archive::{Archive, ArchivedTask};

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// A persisted dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub dependent: TaskId,
    pub prerequisite: TaskId,
    pub created_at: DateTime<Utc>,
    /// Set when the prerequisite completes.
    pub resolved_at: Option<DateTime<Utc>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    description TEXT NOT NULL,
    executor TEXT NOT NULL,
    base_priority INTEGER NOT NULL,
    calculated_priority REAL NOT NULL,
    status TEXT NOT NULL,
    dependency_mode TEXT NOT NULL,
    dependency_depth INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 0,
    submitted_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    parent_id TEXT,
    deadline TEXT,
    last_error TEXT,
    branch_name TEXT,
    workspace_path TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

CREATE TABLE IF NOT EXISTS edges (
    dependent TEXT NOT NULL REFERENCES tasks(id),
    prerequisite TEXT NOT NULL REFERENCES tasks(id),
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    UNIQUE(dependent, prerequisite)
);
CREATE INDEX IF NOT EXISTS idx_edges_prerequisite ON edges(prerequisite);
";

/// Fixed-width timestamp encoding so lexicographic SQL comparisons
/// match chronological order.
pub(crate) fn ts_to_sql(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_opt_to_sql(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts_to_sql)
}

fn sql_to_ts(value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn sql_to_ts_opt(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(sql_to_ts).transpose()
}

fn parse_col<T: FromStr>(value: String) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

pub(crate) fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let executor: String = row.get("executor")?;
    let status: String = row.get("status")?;
    let dependency_mode: String = row.get("dependency_mode")?;
    let submitted_at: String = row.get("submitted_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let updated_at: String = row.get("updated_at")?;
    let parent_id: Option<String> = row.get("parent_id")?;
    let deadline: Option<String> = row.get("deadline")?;
    let workspace_path: Option<String> = row.get("workspace_path")?;

    Ok(Task {
        id: parse_col(id)?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        executor: parse_col(executor)?,
        base_priority: row.get("base_priority")?,
        calculated_priority: row.get("calculated_priority")?,
        status: parse_col(status)?,
        dependency_mode: parse_col(dependency_mode)?,
        dependency_depth: row.get("dependency_depth")?,
        retries: row.get("retries")?,
        max_retries: row.get("max_retries")?,
        submitted_at: sql_to_ts(submitted_at)?,
        started_at: sql_to_ts_opt(started_at)?,
        completed_at: sql_to_ts_opt(completed_at)?,
        updated_at: sql_to_ts(updated_at)?,
        parent_id: parent_id.map(parse_col).transpose()?,
        deadline: sql_to_ts_opt(deadline)?,
        last_error: row.get("last_error")?,
        branch_name: row.get("branch_name")?,
        workspace_path: workspace_path.map(std::path::PathBuf::from),
    })
}

fn edge_from_row(row: &Row) -> rusqlite::Result<EdgeRecord> {
    let dependent: String = row.get("dependent")?;
    let prerequisite: String = row.get("prerequisite")?;
    let created_at: String = row.get("created_at")?;
    let resolved_at: Option<String> = row.get("resolved_at")?;
    Ok(EdgeRecord {
        dependent: parse_col(dependent)?,
        prerequisite: parse_col(prerequisite)?,
        created_at: sql_to_ts(created_at)?,
        resolved_at: sql_to_ts_opt(resolved_at)?,
    })
}

// ---- Row-level helpers, usable inside an open transaction ----

pub(crate) fn insert_task_internal(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (
            id, summary, description, executor, base_priority,
            calculated_priority, status, dependency_mode, dependency_depth,
            retries, max_retries, submitted_at, started_at, completed_at,
            updated_at, parent_id, deadline, last_error, branch_name,
            workspace_path
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                  ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            task.id.to_string(),
            task.summary,
            task.description,
            task.executor.as_str(),
            task.base_priority,
            task.calculated_priority,
            task.status.as_str(),
            task.dependency_mode.as_str(),
            task.dependency_depth,
            task.retries,
            task.max_retries,
            ts_to_sql(&task.submitted_at),
            ts_opt_to_sql(&task.started_at),
            ts_opt_to_sql(&task.completed_at),
            ts_to_sql(&task.updated_at),
            task.parent_id.map(|id| id.to_string()),
            ts_opt_to_sql(&task.deadline),
            task.last_error,
            task.branch_name,
            task.workspace_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_task_internal(conn: &Connection, task: &Task) -> Result<()> {
    let affected = conn.execute(
        "UPDATE tasks SET
            summary = ?2, description = ?3, executor = ?4, base_priority = ?5,
            calculated_priority = ?6, status = ?7, dependency_mode = ?8,
            dependency_depth = ?9, retries = ?10, max_retries = ?11,
            started_at = ?12, completed_at = ?13, updated_at = ?14,
            parent_id = ?15, deadline = ?16, last_error = ?17,
            branch_name = ?18, workspace_path = ?19
         WHERE id = ?1",
        params![
            task.id.to_string(),
            task.summary,
            task.description,
            task.executor.as_str(),
            task.base_priority,
            task.calculated_priority,
            task.status.as_str(),
            task.dependency_mode.as_str(),
            task.dependency_depth,
            task.retries,
            task.max_retries,
            ts_opt_to_sql(&task.started_at),
            ts_opt_to_sql(&task.completed_at),
            ts_to_sql(&task.updated_at),
            task.parent_id.map(|id| id.to_string()),
            ts_opt_to_sql(&task.deadline),
            task.last_error,
            task.branch_name,
            task.workspace_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
        ],
    )?;
    if affected == 0 {
        return Err(Error::TaskNotFound { id: task.id });
    }
    Ok(())
}

pub(crate) fn get_task_internal(conn: &Connection, id: &TaskId) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    let task = stmt
        .query_row(params![id.to_string()], task_from_row)
        .optional()?;
    Ok(task)
}

pub(crate) fn delete_task_internal(conn: &Connection, id: &TaskId) -> Result<usize> {
    Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?)
}

pub(crate) fn insert_edge_internal(
    conn: &Connection,
    dependent: &TaskId,
    prerequisite: &TaskId,
    created_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO edges (dependent, prerequisite, created_at) VALUES (?1, ?2, ?3)",
        params![
            dependent.to_string(),
            prerequisite.to_string(),
            ts_to_sql(&created_at)
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_edge_internal(
    conn: &Connection,
    dependent: &TaskId,
    prerequisite: &TaskId,
) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM edges WHERE dependent = ?1 AND prerequisite = ?2",
        params![dependent.to_string(), prerequisite.to_string()],
    )?)
}

pub(crate) fn delete_edges_touching_internal(conn: &Connection, id: &TaskId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM edges WHERE dependent = ?1 OR prerequisite = ?1",
        params![id.to_string()],
    )?)
}

/// Stamp `resolved_at` on every unresolved edge into a completed
/// prerequisite.
pub(crate) fn resolve_edges_internal(
    conn: &Connection,
    prerequisite: &TaskId,
    at: DateTime<Utc>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE edges SET resolved_at = ?2 WHERE prerequisite = ?1 AND resolved_at IS NULL",
        params![prerequisite.to_string(), ts_to_sql(&at)],
    )?)
}

pub(crate) fn edges_touching_internal(conn: &Connection, id: &TaskId) -> Result<Vec<EdgeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT dependent, prerequisite, created_at, resolved_at
         FROM edges WHERE dependent = ?1 OR prerequisite = ?1",
    )?;
    let rows = stmt.query_map(params![id.to_string()], edge_from_row)?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

/// Statuses of the tasks a dependent directly requires.
pub(crate) fn prerequisite_statuses_internal(
    conn: &Connection,
    dependent: &TaskId,
) -> Result<Vec<(TaskId, TaskStatus)>> {
    id_status_query(
        conn,
        "SELECT t.id, t.status FROM tasks t
         JOIN edges e ON e.prerequisite = t.id
         WHERE e.dependent = ?1",
        dependent,
    )
}

/// Statuses of the tasks that directly depend on a prerequisite.
pub(crate) fn dependent_statuses_internal(
    conn: &Connection,
    prerequisite: &TaskId,
) -> Result<Vec<(TaskId, TaskStatus)>> {
    id_status_query(
        conn,
        "SELECT t.id, t.status FROM tasks t
         JOIN edges e ON e.dependent = t.id
         WHERE e.prerequisite = ?1",
        prerequisite,
    )
}

fn id_status_query(conn: &Connection, sql: &str, id: &TaskId) -> Result<Vec<(TaskId, TaskStatus)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        let id: String = row.get(0)?;
        let status: String = row.get(1)?;
        Ok((parse_col::<TaskId>(id)?, parse_col::<TaskStatus>(status)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// SQLite-backed task and edge store.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open (and create if needed) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;
        Self::init(conn)
    }

    /// Open an in-memory store (used by tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure with the guarded connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        f(&conn)
    }

    /// Run a closure inside a transaction.
    ///
    /// Commits when the closure returns `Ok`; any error rolls the
    /// whole transaction back and is passed through unchanged.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, id))
    }

    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM tasks")?;
            let rows = stmt.query_map([], task_from_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
    }

    pub fn task_ids(&self) -> Result<HashSet<TaskId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM tasks")?;
            let rows = stmt.query_map([], |row| {
                let id: String = row.get(0)?;
                parse_col::<TaskId>(id)
            })?;
            let mut ids = HashSet::new();
            for row in rows {
                ids.insert(row?);
            }
            Ok(ids)
        })
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM tasks WHERE status = ?1")?;
            let rows = stmt.query_map(params![status.as_str()], task_from_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
    }

    /// Ready tasks in dispatch order: highest effective priority first,
    /// oldest submission first on ties.
    pub fn ready_tasks(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE status = 'ready'
                 ORDER BY calculated_priority DESC, submitted_at ASC",
            )?;
            let rows = stmt.query_map([], task_from_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
    }

    pub fn all_edges(&self) -> Result<Vec<EdgeRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT dependent, prerequisite, created_at, resolved_at FROM edges")?;
            let rows = stmt.query_map([], edge_from_row)?;
            let mut edges = Vec::new();
            for row in rows {
                edges.push(row?);
            }
            Ok(edges)
        })
    }

    /// Count of tasks per lifecycle status.
    pub fn status_counts(&self) -> Result<HashMap<TaskStatus, usize>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((parse_col::<TaskStatus>(status)?, count))
            })?;
            let mut counts = HashMap::new();
            for row in rows {
                let (status, count) = row?;
                counts.insert(status, count.max(0) as usize);
            }
            Ok(counts)
        })
    }

    /// Count of tasks not yet in a terminal state.
    pub fn active_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE status NOT IN ('completed', 'failed', 'cancelled')",
                [],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as usize)
        })
    }

    /// Terminal tasks matching the given statuses whose terminal (or,
    /// failing that, last-update) timestamp is at or before the cutoff.
    pub fn prunable_tasks(
        &self,
        statuses: &[TaskStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = statuses
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT * FROM tasks
                 WHERE status IN ({placeholders})
                 AND COALESCE(completed_at, updated_at) <= ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            values.push(ts_to_sql(&cutoff));
            let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), task_from_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore").finish_non_exhaustive()
    }
}
