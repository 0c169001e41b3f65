//! Shared deterministic types for the engine core.
//!
//! These types define the contracts between the decomposition engine, the
//! voting engine and the orchestrator. They carry no I/O handles.

use serde::{Deserialize, Serialize};

/// Strict JSON object requested from the worker during decomposition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecompositionResponse {
    pub subtasks: Vec<String>,
    pub rationale: String,
    pub is_minimal: bool,
}

/// What the decomposition engine decided for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    /// Child descriptions, in evaluation order. Empty when minimal.
    pub subtasks: Vec<String>,
    /// The node should be solved directly.
    pub is_minimal: bool,
    pub rationale: String,
    /// Set when the fixed fallback template was used.
    pub fallback_reason: Option<String>,
}

impl Decomposition {
    pub fn minimal(rationale: impl Into<String>) -> Self {
        Self {
            subtasks: Vec::new(),
            is_minimal: true,
            rationale: rationale.into(),
            fallback_reason: None,
        }
    }
}

/// One ranked candidate as reported in a vote outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateVotes {
    pub text: String,
    pub votes: u32,
}

/// Result of consensus voting on one minimal node.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    /// Position of the winner in `votes`; `None` means no winner.
    pub winner_index: Option<usize>,
    /// `winner votes / total votes cast`; `0.0` without a winner.
    pub confidence: f64,
    /// Whether `confidence` reached the configured threshold. Informational.
    pub meets_confidence_threshold: bool,
    pub rationale: String,
    /// Every counted candidate, ranked by votes then first-seen order.
    pub votes: Vec<CandidateVotes>,
    pub rounds: u32,
    pub escalated: bool,
}

impl VoteOutcome {
    pub fn winner(&self) -> Option<&CandidateVotes> {
        self.winner_index.and_then(|index| self.votes.get(index))
    }

    pub fn total_votes(&self) -> u32 {
        self.votes.iter().map(|candidate| candidate.votes).sum()
    }
}
