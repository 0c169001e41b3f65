//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod ids;
pub mod invariants;
pub mod red_flag;
pub mod selector;
pub mod state_update;
pub mod tally;
pub mod types;
