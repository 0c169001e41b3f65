//! Agents that turn worker sessions into tree decisions.

pub mod decomposer;
pub mod voter;
