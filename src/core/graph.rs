//! Dependency graph view and integrity checks.
//!
//! `DependencyGraph` is the in-memory, invalidate-on-write view of the
//! persisted edge set. Edges point from a dependent task to each of its
//! prerequisites. The graph performs structural validation only; status
//! and priority coupling happens a layer above, so this structure stays
//! independently testable.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Severity of an integrity finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Error,
    Warning,
}

/// The specific integrity problem found by an audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ViolationKind {
    /// A dependency cycle; `path` starts and ends at the same task.
    Cycle { path: Vec<TaskId> },
    /// An edge referencing a task id absent from the task table.
    OrphanedEdge {
        dependent: TaskId,
        prerequisite: TaskId,
    },
    /// The same edge persisted more than once.
    DuplicateEdge {
        dependent: TaskId,
        prerequisite: TaskId,
        count: usize,
    },
    /// A task depending on itself.
    SelfDependency { id: TaskId },
}

/// A reported integrity problem.
///
/// Violations are transient audit output: they are never persisted and
/// never auto-repaired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DagViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub details: String,
    pub suggestion: String,
}

impl DagViolation {
    fn cycle(path: Vec<TaskId>) -> Self {
        let rendered = path
            .iter()
            .map(|id| id.short())
            .collect::<Vec<_>>()
            .join(" -> ");
        Self {
            kind: ViolationKind::Cycle { path },
            severity: Severity::Critical,
            details: format!("dependency cycle: {}", rendered),
            suggestion: "remove one edge on the cycle path".to_string(),
        }
    }

    fn orphaned(dependent: TaskId, prerequisite: TaskId, missing: TaskId) -> Self {
        Self {
            kind: ViolationKind::OrphanedEdge {
                dependent,
                prerequisite,
            },
            severity: Severity::Error,
            details: format!(
                "edge {} -> {} references missing task {}",
                dependent.short(),
                prerequisite.short(),
                missing.short()
            ),
            suggestion: "delete the edge or restore the missing task".to_string(),
        }
    }

    fn duplicate(dependent: TaskId, prerequisite: TaskId, count: usize) -> Self {
        Self {
            kind: ViolationKind::DuplicateEdge {
                dependent,
                prerequisite,
                count,
            },
            severity: Severity::Warning,
            details: format!(
                "edge {} -> {} persisted {} times",
                dependent.short(),
                prerequisite.short(),
                count
            ),
            suggestion: format!("remove {} redundant copies", count - 1),
        }
    }

    fn self_dependency(id: TaskId) -> Self {
        Self {
            kind: ViolationKind::SelfDependency { id },
            severity: Severity::Error,
            details: format!("task {} depends on itself", id.short()),
            suggestion: "delete the self-edge".to_string(),
        }
    }
}

/// DFS coloring for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// In-memory dependency graph over task ids.
///
/// Built on petgraph's `StableDiGraph` so node indices survive removals.
/// An edge `D -> P` means D depends on P. Depths are cached per task and
/// invalidated (together with all transitive dependents) on any edge
/// mutation touching the task; recomputation happens lazily on the next
/// read.
pub struct DependencyGraph {
    graph: StableDiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
    depth_cache: HashMap<TaskId, u32>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            depth_cache: HashMap::new(),
        }
    }

    /// Add a task node. Idempotent for known ids.
    pub fn insert_node(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id);
        self.index.insert(id, idx);
        idx
    }

    /// Remove a task node and all its edges.
    ///
    /// Depth caches of its dependents are invalidated first.
    pub fn remove_node(&mut self, id: &TaskId) {
        self.invalidate_depth(id);
        if let Some(idx) = self.index.remove(id) {
            self.graph.remove_node(idx);
        }
        self.depth_cache.remove(id);
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the edge (dependent -> prerequisite) exists.
    pub fn has_edge(&self, dependent: &TaskId, prerequisite: &TaskId) -> bool {
        match (self.index.get(dependent), self.index.get(prerequisite)) {
            (Some(&d), Some(&p)) => self.graph.find_edge(d, p).is_some(),
            _ => false,
        }
    }

    /// Ids this task directly depends on.
    pub fn prerequisites_of(&self, id: &TaskId) -> Vec<TaskId> {
        match self.index.get(id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ids that directly depend on this task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        match self.index.get(id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Add a validated dependency edge.
    ///
    /// Validations run in increasing cost order: both tasks exist,
    /// no self-edge, no duplicate, and finally no cycle. The cycle check
    /// inserts the edge tentatively and walks from the dependent with a
    /// three-color DFS; on rejection the edge is removed again and the
    /// explicit cycle path is returned in the error.
    pub fn add_edge(&mut self, dependent: TaskId, prerequisite: TaskId) -> Result<()> {
        let d = *self
            .index
            .get(&dependent)
            .ok_or(Error::TaskNotFound { id: dependent })?;
        let p = *self
            .index
            .get(&prerequisite)
            .ok_or(Error::TaskNotFound { id: prerequisite })?;

        if dependent == prerequisite {
            return Err(Error::SelfDependency { id: dependent });
        }
        if self.graph.find_edge(d, p).is_some() {
            return Err(Error::DuplicateDependency {
                dependent,
                prerequisite,
            });
        }

        let edge = self.graph.add_edge(d, p, ());
        let mut color = HashMap::new();
        if let Some(cycle) = self.find_cycle_from(d, &mut color) {
            self.graph.remove_edge(edge);
            return Err(Error::CircularDependency {
                dependent,
                prerequisite,
                cycle,
            });
        }

        self.invalidate_depth(&dependent);
        Ok(())
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependent: TaskId, prerequisite: TaskId) -> Result<()> {
        let d = *self
            .index
            .get(&dependent)
            .ok_or(Error::TaskNotFound { id: dependent })?;
        let p = *self
            .index
            .get(&prerequisite)
            .ok_or(Error::TaskNotFound { id: prerequisite })?;

        let edge = self
            .graph
            .find_edge(d, p)
            .ok_or(Error::DependencyNotFound {
                dependent,
                prerequisite,
            })?;
        self.graph.remove_edge(edge);
        self.invalidate_depth(&dependent);
        Ok(())
    }

    /// Insert an edge without validation.
    ///
    /// Used when hydrating the view from persisted rows, which were
    /// validated when written. Endpoints must already be nodes.
    pub(crate) fn insert_edge_unchecked(&mut self, dependent: TaskId, prerequisite: TaskId) {
        if let (Some(&d), Some(&p)) = (self.index.get(&dependent), self.index.get(&prerequisite)) {
            if self.graph.find_edge(d, p).is_none() {
                self.graph.add_edge(d, p, ());
            }
        }
    }

    /// Put back an edge removed from the view when the matching store
    /// transaction failed, re-invalidating the dependent's depth.
    pub(crate) fn restore_edge(&mut self, dependent: TaskId, prerequisite: TaskId) {
        self.insert_edge_unchecked(dependent, prerequisite);
        self.invalidate_depth(&dependent);
    }

    /// Longest prerequisite chain beneath a task.
    ///
    /// `0` for a task with no prerequisites, else `1 + max` over its
    /// prerequisites. Memoized; invalidated caches recompute here with
    /// an iterative post-order walk.
    pub fn dependency_depth(&mut self, id: &TaskId) -> Result<u32> {
        let start = *self.index.get(id).ok_or(Error::TaskNotFound { id: *id })?;

        let mut stack = vec![start];
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();
        while let Some(&node) = stack.last() {
            let task_id = self.graph[node];
            if self.depth_cache.contains_key(&task_id) {
                stack.pop();
                on_stack.remove(&node);
                continue;
            }
            on_stack.insert(node);

            let prereqs: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .collect();
            let pending: Vec<NodeIndex> = prereqs
                .iter()
                .copied()
                .filter(|p| {
                    !self.depth_cache.contains_key(&self.graph[*p]) && !on_stack.contains(p)
                })
                .collect();

            if pending.is_empty() {
                // A prerequisite still on the walk stack means a cycle
                // leaked into the store; its contribution is skipped.
                let depth = prereqs
                    .iter()
                    .filter_map(|p| self.depth_cache.get(&self.graph[*p]).copied())
                    .map(|d| d + 1)
                    .max()
                    .unwrap_or(0);
                self.depth_cache.insert(task_id, depth);
                stack.pop();
                on_stack.remove(&node);
            } else {
                stack.extend(pending);
            }
        }

        Ok(self.depth_cache.get(id).copied().unwrap_or(0))
    }

    /// Drop the cached depth of a task and of every transitive
    /// dependent. Recomputation happens on the next read.
    fn invalidate_depth(&mut self, id: &TaskId) {
        let Some(&start) = self.index.get(id) else {
            return;
        };
        let mut queue = vec![start];
        let mut seen = HashSet::new();
        while let Some(node) = queue.pop() {
            if !seen.insert(node) {
                continue;
            }
            self.depth_cache.remove(&self.graph[node]);
            queue.extend(self.graph.neighbors_directed(node, Direction::Incoming));
        }
    }

    /// Three-color DFS from `start` along prerequisite edges.
    ///
    /// Returns the explicit cycle path (first element repeated at the
    /// end) when a gray node is revisited. The caller owns the color
    /// map so a full-graph sweep can share it across roots.
    fn find_cycle_from(
        &self,
        start: NodeIndex,
        color: &mut HashMap<NodeIndex, Color>,
    ) -> Option<Vec<TaskId>> {
        if color.contains_key(&start) {
            return None;
        }
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();

        color.insert(start, Color::Gray);
        let kids: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .collect();
        stack.push((start, kids));

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            match top.1.pop() {
                None => {
                    color.insert(node, Color::Black);
                    stack.pop();
                }
                Some(next) => match color.get(&next) {
                    None => {
                        parent.insert(next, node);
                        color.insert(next, Color::Gray);
                        let kids: Vec<NodeIndex> = self
                            .graph
                            .neighbors_directed(next, Direction::Outgoing)
                            .collect();
                        stack.push((next, kids));
                    }
                    Some(Color::Gray) => {
                        // Walk parent pointers from the current node back
                        // to the revisited gray node to extract the path.
                        let mut rev = vec![node];
                        let mut cur = node;
                        while cur != next {
                            match parent.get(&cur) {
                                Some(&up) => {
                                    cur = up;
                                    rev.push(cur);
                                }
                                None => break,
                            }
                        }
                        rev.reverse();
                        let mut path: Vec<TaskId> =
                            rev.into_iter().map(|n| self.graph[n]).collect();
                        path.push(self.graph[next]);
                        return Some(path);
                    }
                    Some(Color::Black) => {}
                },
            }
        }
        None
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

/// Full-graph integrity sweep over persisted rows.
///
/// Reports cycles, orphaned edges, duplicates, and self-dependencies.
/// Read-only diagnostic: nothing is repaired here. The cycle sweep
/// shares its color map across DFS roots so each cycle is reported once.
pub fn audit_edges(task_ids: &HashSet<TaskId>, edges: &[(TaskId, TaskId)]) -> Vec<DagViolation> {
    let mut violations = Vec::new();

    // Self-dependencies and duplicates come straight off the rows.
    let mut counts: HashMap<(TaskId, TaskId), usize> = HashMap::new();
    for &(dependent, prerequisite) in edges {
        if dependent == prerequisite {
            violations.push(DagViolation::self_dependency(dependent));
        }
        *counts.entry((dependent, prerequisite)).or_insert(0) += 1;
    }
    for (&(dependent, prerequisite), &count) in &counts {
        if count > 1 {
            violations.push(DagViolation::duplicate(dependent, prerequisite, count));
        }
    }

    // Orphaned edges reference ids missing from the task table.
    for &(dependent, prerequisite) in edges {
        if !task_ids.contains(&dependent) {
            violations.push(DagViolation::orphaned(dependent, prerequisite, dependent));
        }
        if !task_ids.contains(&prerequisite) {
            violations.push(DagViolation::orphaned(dependent, prerequisite, prerequisite));
        }
    }

    // Cycle sweep over the well-formed subset (self-edges are reported
    // above and would otherwise surface as length-two paths).
    let mut graph = DependencyGraph::new();
    for &id in task_ids {
        graph.insert_node(id);
    }
    for &(dependent, prerequisite) in edges {
        if dependent != prerequisite
            && task_ids.contains(&dependent)
            && task_ids.contains(&prerequisite)
        {
            graph.insert_edge_unchecked(dependent, prerequisite);
        }
    }
    let mut color = HashMap::new();
    let roots: Vec<NodeIndex> = graph.index.values().copied().collect();
    for root in roots {
        if let Some(path) = graph.find_cycle_from(root, &mut color) {
            violations.push(DagViolation::cycle(path));
        }
    }

    violations
}
