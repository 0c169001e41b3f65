//! Engine-owned state transitions for task nodes.

use std::collections::BTreeMap;

use crate::core::types::VoteOutcome;
use crate::tree::{TaskNode, TaskStatus, TreeError, VoteRecord};

/// Separator placed between child results when a parent aggregates.
pub const RESULT_SEPARATOR: &str = "\n\n";

/// Resolve a minimal, in-progress node from its vote outcome.
///
/// A winner completes the node, stores its text as the result and records the
/// full tally for auditing. Without a winner the node fails and keeps no
/// result.
pub fn apply_vote_outcome(node: &mut TaskNode, outcome: &VoteOutcome) -> Result<(), TreeError> {
    let votes: BTreeMap<String, u32> = outcome
        .votes
        .iter()
        .map(|candidate| (candidate.text.clone(), candidate.votes))
        .collect();
    node.context.vote = Some(VoteRecord {
        candidates: outcome.votes.iter().map(|c| c.text.clone()).collect(),
        votes,
        rounds: outcome.rounds,
        escalated: outcome.escalated,
        confidence: outcome.confidence,
        rationale: outcome.rationale.clone(),
    });

    match outcome.winner() {
        Some(winner) => {
            node.transition(TaskStatus::Completed)?;
            node.result = Some(winner.text.clone());
        }
        None => {
            node.transition(TaskStatus::Failed)?;
            node.result = None;
            node.context.failure_reason = Some(outcome.rationale.clone());
        }
    }
    Ok(())
}

/// Derive a composite node's status from its children.
///
/// All children `Completed` -> `Completed` with results joined in child order.
/// Any child `Failed` -> `Failed`. Otherwise the node is left untouched and
/// `Ok(false)` is returned.
pub fn aggregate_children(node: &mut TaskNode) -> Result<bool, TreeError> {
    if node.children.is_empty() {
        return Err(TreeError::InvalidState(format!(
            "{}: cannot aggregate a node without children",
            node.id
        )));
    }

    if let Some(failed) = node
        .children
        .iter()
        .find(|child| child.status == TaskStatus::Failed)
    {
        let reason = format!("subtask {} failed", failed.id);
        node.transition(TaskStatus::Failed)?;
        node.context.failure_reason = Some(reason);
        return Ok(true);
    }

    if node
        .children
        .iter()
        .all(|child| child.status == TaskStatus::Completed)
    {
        let joined = node
            .children
            .iter()
            .filter_map(|child| child.result.as_deref())
            .collect::<Vec<_>>()
            .join(RESULT_SEPARATOR);
        node.transition(TaskStatus::Completed)?;
        node.result = Some(joined);
        return Ok(true);
    }

    Ok(false)
}
