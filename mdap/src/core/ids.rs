//! Identifier sources for nodes and worker sessions.

use std::cell::Cell;

use uuid::Uuid;

pub trait IdSource {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs, used for real runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic `<prefix>-<n>` ids (1-based).
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: Cell<u64>,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: Cell::new(1),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.get();
        self.next.set(n + 1);
        format!("{}-{}", self.prefix, n)
    }
}
