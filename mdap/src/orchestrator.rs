//! Depth-first driver for a run: decompose, vote, aggregate, persist.
//!
//! The orchestrator owns the snapshot exclusively and writes it after every
//! node transition. Nodes are addressed by id so each step re-borrows the
//! tree only for as long as it needs it.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::agents::decomposer::DecomposerAgent;
use crate::agents::voter::VoterAgent;
use crate::core::ids::IdSource;
use crate::core::state_update::{aggregate_children, apply_vote_outcome};
use crate::error::MdapError;
use crate::io::config::RunConfig;
use crate::io::escalation::EscalationGate;
use crate::io::state_store::{PersistedState, StateStore};
use crate::io::worker::Worker;
use crate::tree::{NodeContext, TaskNode, TaskStatus, TreeError};

pub const META_RUN_ID: &str = "run_id";
pub const META_GOAL: &str = "goal";
pub const META_LAST_NODE: &str = "last_node";
pub const META_OUTCOME: &str = "outcome";

/// Summary of the root after a run or resume.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Option<String>,
    pub root_id: String,
    pub status: TaskStatus,
    pub completion_ratio: f64,
    pub result: Option<String>,
    pub failure_reason: Option<String>,
}

impl RunReport {
    fn from_state(state: &PersistedState, root: &TaskNode) -> Self {
        Self {
            run_id: state.metadata.get(META_RUN_ID).cloned(),
            root_id: root.id.clone(),
            status: root.status,
            completion_ratio: state.tree.completion_ratio(),
            result: root.result.clone(),
            failure_reason: root.context.failure_reason.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

pub struct Orchestrator<'a, W: ?Sized, G: ?Sized, I: ?Sized> {
    store: StateStore,
    state: PersistedState,
    config: RunConfig,
    worker: &'a W,
    gate: &'a G,
    ids: &'a I,
    decomposer: DecomposerAgent,
    voter: VoterAgent,
}

impl<'a, W, G, I> Orchestrator<'a, W, G, I>
where
    W: Worker + ?Sized,
    G: EscalationGate + ?Sized,
    I: IdSource + ?Sized,
{
    /// Load the snapshot behind `store` and prepare both agents.
    pub fn open(
        store: StateStore,
        config: RunConfig,
        worker: &'a W,
        gate: &'a G,
        ids: &'a I,
    ) -> Result<Self> {
        config.validate()?;
        let state = store.load()?;
        Ok(Self {
            decomposer: DecomposerAgent::new(&config)?,
            voter: VoterAgent::new(&config)?,
            store,
            state,
            config,
            worker,
            gate,
            ids,
        })
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Create the root for `goal` and drive it to a terminal state.
    ///
    /// Fails if the snapshot already has a root.
    #[instrument(skip_all)]
    pub fn start(&mut self, goal: &str, repo: Option<String>) -> Result<RunReport> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(anyhow!("goal must not be empty"));
        }
        let root_id = self.ids.next_id();
        self.state
            .tree
            .create_root(root_id.clone(), goal, NodeContext::with_repo(repo))
            .map_err(MdapError::from)?;
        let run_id = self.ids.next_id();
        info!(run_id = %run_id, root_id = %root_id, "run started");
        self.state.config = Some(self.config.clone());
        self.state
            .metadata
            .insert(META_RUN_ID.to_string(), run_id);
        self.state
            .metadata
            .insert(META_GOAL.to_string(), goal.to_string());
        self.persist(&root_id)?;
        self.drive(&root_id)
    }

    /// Continue a persisted run from its first open node.
    ///
    /// A snapshot whose root is already terminal is reported as-is and left
    /// untouched on disk.
    #[instrument(skip_all)]
    pub fn resume(&mut self) -> Result<RunReport> {
        let root = self.state.tree.root().ok_or_else(|| {
            anyhow!(
                "no run to resume in {} (use `mdap run` first)",
                self.store.path().display()
            )
        })?;
        if root.is_terminal() {
            info!(root_id = %root.id, status = root.status.as_str(), "run already finished");
            return Ok(RunReport::from_state(&self.state, root));
        }
        let root_id = root.id.clone();
        self.state.config = Some(self.persisted_config());
        info!(root_id = %root_id, "resuming run");
        self.drive(&root_id)
    }

    /// The effective config as it should be stored on resume. The stored
    /// depth ceiling never shrinks, so nodes created under an earlier, higher
    /// ceiling still load.
    fn persisted_config(&self) -> RunConfig {
        let mut config = self.config.clone();
        if let Some(stored) = &self.state.config {
            config.max_recursion_depth = config
                .max_recursion_depth
                .max(stored.max_recursion_depth);
        }
        config
    }

    fn drive(&mut self, root_id: &str) -> Result<RunReport> {
        self.visit(root_id, None)?;
        let root = self.node(root_id)?;
        let outcome = root.status.as_str().to_string();
        info!(root_id, outcome = %outcome, "run finished");
        self.state
            .metadata
            .insert(META_OUTCOME.to_string(), outcome);
        self.persist(root_id)?;
        let root = self.node(root_id)?;
        Ok(RunReport::from_state(&self.state, root))
    }

    #[instrument(skip_all, fields(node_id = %id))]
    fn visit(&mut self, id: &str, parent: Option<&str>) -> Result<()> {
        let node = self.node(id)?;
        if node.is_terminal() {
            debug!("already terminal");
            return Ok(());
        }
        if node.status == TaskStatus::Pending {
            self.transition(id, TaskStatus::InProgress)?;
        }

        let node = self.node(id)?;
        if !node.children.is_empty() {
            return self.finish_composite(id);
        }
        if node.is_minimal {
            return self.solve(id, parent);
        }

        let decomposition = self.decomposer.decompose(self.worker, node, parent)?;
        if let Some(reason) = &decomposition.fallback_reason {
            warn!(%reason, "using fallback decomposition");
        }
        let description = node.description.clone();
        let max_depth = self.config.max_recursion_depth;
        {
            let node = self.node_mut(id)?;
            if !decomposition.rationale.is_empty() {
                node.context.rationale = Some(decomposition.rationale.clone());
            }
            if decomposition.is_minimal || decomposition.subtasks.is_empty() {
                node.is_minimal = true;
            }
        }
        if decomposition.is_minimal || decomposition.subtasks.is_empty() {
            self.persist(id)?;
            return self.solve(id, parent);
        }

        for subtask in &decomposition.subtasks {
            let child_id = self.ids.next_id();
            self.state
                .tree
                .attach_child(id, child_id, subtask.as_str(), max_depth)
                .map_err(MdapError::from)?;
        }
        info!(children = decomposition.subtasks.len(), "children attached");
        self.persist(id)?;

        let child_ids: Vec<String> = self
            .node(id)?
            .children
            .iter()
            .map(|child| child.id.clone())
            .collect();
        for child_id in &child_ids {
            self.visit(child_id, Some(description.as_str()))?;
        }
        self.aggregate(id)
    }

    /// Resumed composite: finish any open children, then aggregate.
    fn finish_composite(&mut self, id: &str) -> Result<()> {
        let node = self.node(id)?;
        let description = node.description.clone();
        let child_ids: Vec<String> = node.children.iter().map(|c| c.id.clone()).collect();
        for child_id in &child_ids {
            self.visit(child_id, Some(description.as_str()))?;
        }
        self.aggregate(id)
    }

    fn aggregate(&mut self, id: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        let changed = aggregate_children(node).map_err(MdapError::from)?;
        if !changed {
            warn!(node_id = id, "children still open after traversal");
            return Ok(());
        }
        info!(node_id = id, status = node.status.as_str(), "composite resolved");
        self.persist(id)
    }

    fn solve(&mut self, id: &str, parent: Option<&str>) -> Result<()> {
        let node = self.node(id)?;
        let outcome = self.voter.vote(self.worker, self.gate, node, parent)?;
        let node = self.node_mut(id)?;
        apply_vote_outcome(node, &outcome).map_err(MdapError::from)?;
        match outcome.winner() {
            Some(winner) => info!(
                node_id = id,
                votes = winner.votes,
                confidence = outcome.confidence,
                "minimal task completed"
            ),
            None => warn!(node_id = id, reason = %outcome.rationale, "minimal task failed"),
        }
        self.persist(id)
    }

    fn transition(&mut self, id: &str, next: TaskStatus) -> Result<()> {
        self.node_mut(id)?
            .transition(next)
            .map_err(MdapError::from)?;
        self.persist(id)
    }

    fn persist(&mut self, id: &str) -> Result<()> {
        self.state
            .metadata
            .insert(META_LAST_NODE.to_string(), id.to_string());
        self.store.save(&self.state)
    }

    fn node(&self, id: &str) -> Result<&TaskNode> {
        self.state
            .tree
            .find(id)
            .ok_or_else(|| MdapError::from(TreeError::NotFound(id.to_string())).into())
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut TaskNode> {
        self.state
            .tree
            .find_mut(id)
            .ok_or_else(|| MdapError::from(TreeError::NotFound(id.to_string())).into())
    }
}
