//! Side-effecting collaborators: persistence, config, worker processes,
//! prompts and the human escalation boundary.

pub mod config;
pub mod escalation;
pub mod process;
pub mod prompt;
pub mod state_store;
pub mod worker;
