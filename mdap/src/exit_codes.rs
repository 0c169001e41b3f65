//! Stable exit codes for `mdap` commands.

/// The root task completed.
pub const OK: i32 = 0;
/// Invalid config or snapshot, persistence failure, or any other error.
pub const INVALID: i32 = 1;
/// The run finished but the root task failed.
pub const FAILED: i32 = 2;
/// `mdap status` found a run that has not finished yet.
pub const INCOMPLETE: i32 = 3;
