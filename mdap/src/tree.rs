//! Task tree: the in-memory record of recursive decomposition.
//!
//! The tree owns its nodes directly (children are owned values, never shared),
//! so it is acyclic by construction. All operations are synchronous and pure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a task node. Transitions are monotonic:
/// `Pending -> InProgress -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Audit record of the consensus vote that resolved a minimal node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Every counted candidate, ranked by votes (ties by first-seen order).
    pub candidates: Vec<String>,
    /// Canonical candidate text -> votes received.
    pub votes: BTreeMap<String, u32>,
    pub rounds: u32,
    pub escalated: bool,
    pub confidence: f64,
    pub rationale: String,
}

/// Typed per-node context.
///
/// Only `repo` is inherited by children; the remaining fields describe how
/// this particular node was resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    /// Repository / working directory handed to the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Rationale returned by the decomposition step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<VoteRecord>,
    /// Why the node ended up `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl NodeContext {
    pub fn with_repo(repo: Option<String>) -> Self {
        Self {
            repo,
            ..Self::default()
        }
    }

    /// Context handed to a freshly created child.
    pub fn inherited(&self) -> Self {
        Self::with_repo(self.repo.clone())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskNode {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub depth: u32,
    pub is_minimal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub context: NodeContext,
    #[serde(default)]
    pub children: Vec<TaskNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("invalid tree state: {0}")]
    InvalidState(String),
}

impl TaskNode {
    pub fn new(id: impl Into<String>, description: impl Into<String>, depth: u32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            depth,
            is_minimal: false,
            result: None,
            context: NodeContext::default(),
            children: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting any transition that is not forward.
    ///
    /// `InProgress -> InProgress` is accepted so an interrupted node can be
    /// re-entered on resume.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TreeError> {
        let allowed = matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        );
        if !allowed {
            return Err(TreeError::InvalidState(format!(
                "{}: illegal transition {} -> {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Depth-first (pre-order) lookup.
    pub fn find(&self, id: &str) -> Option<&TaskNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        if self.id == id {
            return Some(self);
        }
        for child in &mut self.children {
            if let Some(found) = child.find_mut(id) {
                return Some(found);
            }
        }
        None
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TaskNode::count).sum::<usize>()
    }

    fn count_completed(&self) -> usize {
        let own = usize::from(self.status == TaskStatus::Completed);
        own + self
            .children
            .iter()
            .map(TaskNode::count_completed)
            .sum::<usize>()
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TaskNode>) {
        if self.children.is_empty() {
            out.push(self);
            return;
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }
}

/// Owner of the (single) root of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskTree {
    root: Option<TaskNode>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_root(root: TaskNode) -> Self {
        Self { root: Some(root) }
    }

    pub fn root(&self) -> Option<&TaskNode> {
        self.root.as_ref()
    }

    pub fn into_root(self) -> Option<TaskNode> {
        self.root
    }

    pub fn create_root(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        context: NodeContext,
    ) -> Result<&TaskNode, TreeError> {
        if let Some(existing) = &self.root {
            return Err(TreeError::InvalidState(format!(
                "root '{}' already exists for this run",
                existing.id
            )));
        }
        let mut root = TaskNode::new(id, description, 0);
        root.context = context;
        Ok(&*self.root.insert(root))
    }

    /// Attach a fresh child under `parent_id`.
    ///
    /// The child gets `depth = parent.depth + 1` and inherits the parent's
    /// context. Fails if the parent is missing, minimal, terminal, or if the
    /// new depth would exceed `max_depth`.
    pub fn attach_child(
        &mut self,
        parent_id: &str,
        id: impl Into<String>,
        description: impl Into<String>,
        max_depth: u32,
    ) -> Result<&TaskNode, TreeError> {
        let id = id.into();
        let root = self
            .root
            .as_mut()
            .ok_or_else(|| TreeError::NotFound(parent_id.to_string()))?;
        if root.find(&id).is_some() {
            return Err(TreeError::InvalidState(format!("duplicate node id '{id}'")));
        }
        let parent = root
            .find_mut(parent_id)
            .ok_or_else(|| TreeError::NotFound(parent_id.to_string()))?;
        if parent.is_minimal {
            return Err(TreeError::InvalidState(format!(
                "{parent_id}: minimal nodes cannot have children"
            )));
        }
        if parent.is_terminal() {
            return Err(TreeError::InvalidState(format!(
                "{parent_id}: cannot attach children to a {} node",
                parent.status.as_str()
            )));
        }
        let depth = parent.depth + 1;
        if depth > max_depth {
            return Err(TreeError::InvalidState(format!(
                "{parent_id}: child depth {depth} exceeds maximum {max_depth}"
            )));
        }
        let mut child = TaskNode::new(id, description, depth);
        child.context = parent.context.inherited();
        parent.children.push(child);
        let last = parent.children.len() - 1;
        Ok(&parent.children[last])
    }

    pub fn find(&self, id: &str) -> Option<&TaskNode> {
        self.root.as_ref().and_then(|root| root.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        self.root.as_mut().and_then(|root| root.find_mut(id))
    }

    pub fn leaves(&self) -> Vec<&TaskNode> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_leaves(&mut out);
        }
        out
    }

    /// `completed / total` over every node; `0.0` for an empty tree.
    pub fn completion_ratio(&self) -> f64 {
        match &self.root {
            Some(root) => root.count_completed() as f64 / root.count() as f64,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_root() -> TaskTree {
        let mut tree = TaskTree::new();
        tree.create_root(
            "root",
            "build the thing",
            NodeContext::with_repo(Some("/repo".into())),
        )
        .expect("root");
        tree
    }

    #[test]
    fn second_root_is_rejected() {
        let mut tree = tree_with_root();
        let err = tree
            .create_root("other", "again", NodeContext::default())
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidState(_)));
    }

    #[test]
    fn attach_child_sets_depth_and_inherits_repo() {
        let mut tree = tree_with_root();
        tree.attach_child("root", "a", "first step", 3).expect("attach a");
        let grandchild = tree.attach_child("a", "a1", "nested", 3).expect("attach a1");
        assert_eq!(grandchild.depth, 2);
        assert_eq!(grandchild.context.repo.as_deref(), Some("/repo"));
        assert_eq!(grandchild.status, TaskStatus::Pending);
    }

    #[test]
    fn attach_child_to_missing_parent_is_not_found() {
        let mut tree = tree_with_root();
        let err = tree.attach_child("ghost", "x", "x", 3).unwrap_err();
        assert_eq!(err, TreeError::NotFound("ghost".to_string()));

        let mut empty = TaskTree::new();
        assert!(matches!(
            empty.attach_child("root", "x", "x", 3),
            Err(TreeError::NotFound(_))
        ));
    }

    #[test]
    fn attach_child_respects_depth_ceiling_and_minimality() {
        let mut tree = tree_with_root();
        tree.attach_child("root", "a", "a", 1).expect("depth 1");
        assert!(matches!(
            tree.attach_child("a", "a1", "a1", 1),
            Err(TreeError::InvalidState(_))
        ));

        tree.find_mut("a").expect("a").is_minimal = true;
        assert!(matches!(
            tree.attach_child("a", "a2", "a2", 5),
            Err(TreeError::InvalidState(_))
        ));
    }

    #[test]
    fn attach_child_rejects_duplicate_ids() {
        let mut tree = tree_with_root();
        tree.attach_child("root", "a", "a", 3).expect("a");
        assert!(matches!(
            tree.attach_child("root", "a", "again", 3),
            Err(TreeError::InvalidState(_))
        ));
    }

    #[test]
    fn leaves_and_completion_ratio() {
        let mut tree = tree_with_root();
        tree.attach_child("root", "a", "a", 3).expect("a");
        tree.attach_child("root", "b", "b", 3).expect("b");
        tree.attach_child("a", "a1", "a1", 3).expect("a1");

        let ids: Vec<&str> = tree.leaves().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b"]);

        let b = tree.find_mut("b").expect("b");
        b.transition(TaskStatus::InProgress).expect("start");
        b.transition(TaskStatus::Completed).expect("complete");
        assert!((tree.completion_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut node = TaskNode::new("n", "n", 0);
        assert!(node.transition(TaskStatus::Completed).is_err());
        node.transition(TaskStatus::InProgress).expect("start");
        node.transition(TaskStatus::InProgress).expect("re-enter");
        node.transition(TaskStatus::Failed).expect("fail");
        assert!(node.transition(TaskStatus::InProgress).is_err());
        assert!(node.transition(TaskStatus::Pending).is_err());
    }
}
