//! Recursive decompose / vote / aggregate engine for agentic task solving.
//!
//! A goal becomes the root of a task tree. Composite nodes are split into
//! ordered subtasks by a worker; minimal nodes are solved by sampling several
//! worker sessions and accepting the first answer that leads its runner-up by
//! a fixed margin. Parents complete once every child has. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (vote tally, red-flag filter,
//!   invariants, state transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (snapshot store, config, worker
//!   processes, prompts, human escalation).
//!
//! [`agents`] turn worker sessions into tree decisions and [`orchestrator`]
//! drives the tree, persisting after every transition.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
