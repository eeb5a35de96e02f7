//! Append-only archive log for pruned tasks.
//!
//! Before the maintenance engine deletes anything, the full task record
//! and every edge touching it are serialized here, one JSON object per
//! line. The log is durable history, not queryable state.

use crate::core::task::Task;
use crate::error::Result;
use crate::store::EdgeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One archived task with the edges that referenced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTask {
    pub task: Task,
    pub edges: Vec<EdgeRecord>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedTask {
    pub fn new(task: Task, edges: Vec<EdgeRecord>) -> Self {
        Self {
            task,
            edges,
            archived_at: Utc::now(),
        }
    }
}

/// Writer for the archive log.
#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
}

impl Archive {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records as JSON lines, syncing before returning.
    ///
    /// Any error here aborts the surrounding prune transaction, so a
    /// task is never deleted without its archive line on disk.
    pub fn append_all(&self, records: &[ArchivedTask]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
        Ok(())
    }
}
