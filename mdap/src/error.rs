//! Error taxonomy for a run.
//!
//! Sample-level and decomposition-level failures are absorbed: they are
//! rendered into failure reasons and logged. `PersistenceWrite` and
//! `TreeInvariant` are fatal and travel inside `anyhow::Error` so callers can
//! `downcast_ref::<MdapError>()` them.

use std::path::PathBuf;

use thiserror::Error;

use crate::tree::TreeError;

#[derive(Debug, Error)]
pub enum MdapError {
    #[error("worker launch failed: {0}")]
    WorkerLaunch(String),

    #[error("worker session {session_id} timed out after {polls} polls")]
    WorkerTimeout { session_id: String, polls: u32 },

    #[error("decomposition response could not be parsed: {0}")]
    DecompositionParse(String),

    #[error("consensus not reached for task {task_id}: {reason}")]
    ConsensusNotReached { task_id: String, reason: String },

    #[error("failed to persist state to {path}: {reason}")]
    PersistenceWrite { path: PathBuf, reason: String },

    #[error("tree invariant violated: {0}")]
    TreeInvariant(#[from] TreeError),
}
