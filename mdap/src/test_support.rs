//! Test-only helpers: deterministic nodes, a scripted worker and a scripted
//! escalation gate.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use anyhow::{Result, anyhow};

use crate::io::config::RunConfig;
use crate::io::escalation::{EscalationGate, EscalationRequest};
use crate::io::worker::{SessionPoll, Worker};
use crate::tree::{NodeContext, TaskNode, TaskStatus};

/// Pending node at depth 0 with a deterministic description.
pub fn leaf(id: &str) -> TaskNode {
    TaskNode::new(id, format!("{id} task"), 0)
}

/// Completed leaf carrying `result`.
pub fn completed_leaf(id: &str, result: &str) -> TaskNode {
    let mut node = leaf(id);
    node.status = TaskStatus::Completed;
    node.result = Some(result.to_string());
    node
}

pub fn failed_leaf(id: &str) -> TaskNode {
    let mut node = leaf(id);
    node.status = TaskStatus::Failed;
    node.context.failure_reason = Some(format!("{id} failed"));
    node
}

/// Node at depth 0 owning `children`; child depths are rewritten so the
/// result is depth-consistent.
pub fn node_with_children(id: &str, children: Vec<TaskNode>) -> TaskNode {
    let mut node = leaf(id);
    node.children = children;
    reset_depths(&mut node, 0);
    node
}

fn reset_depths(node: &mut TaskNode, depth: u32) {
    node.depth = depth;
    for child in &mut node.children {
        reset_depths(child, depth + 1);
    }
}

/// Config with no poll delay and a small poll budget.
pub fn fast_config() -> RunConfig {
    RunConfig {
        poll_interval_ms: 0,
        max_polls_per_round: 5,
        ..RunConfig::default()
    }
}

/// Behaviour of one scripted session, consumed in `start` order.
#[derive(Debug, Clone)]
pub enum ScriptedSession {
    /// `start` itself fails.
    LaunchError(String),
    /// Resolves as completed on the `n`-th poll (1-based).
    CompletesAfter { polls: u32, output: String },
    /// Resolves as failed on the first poll.
    Fails(String),
}

impl ScriptedSession {
    pub fn completes_after(polls: u32, output: impl Into<String>) -> Self {
        Self::CompletesAfter {
            polls,
            output: output.into(),
        }
    }

    pub fn launch_error(message: impl Into<String>) -> Self {
        Self::LaunchError(message.into())
    }

    pub fn fails(error: impl Into<String>) -> Self {
        Self::Fails(error.into())
    }
}

/// Worker that replays scripted sessions and records every prompt it saw.
///
/// Starting a session once the script is exhausted is a launch error.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    script: RefCell<VecDeque<ScriptedSession>>,
    running: RefCell<HashMap<String, (ScriptedSession, u32)>>,
    prompts: RefCell<Vec<String>>,
    next_id: Cell<u32>,
}

impl ScriptedWorker {
    pub fn new(script: Vec<ScriptedSession>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            ..Self::default()
        }
    }

    /// Prompts passed to `start`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    /// Sessions not yet started.
    pub fn remaining(&self) -> usize {
        self.script.borrow().len()
    }
}

impl Worker for ScriptedWorker {
    fn start(&self, prompt: &str, _context: &NodeContext) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        let session = self
            .script
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted worker has no sessions left"))?;
        if let ScriptedSession::LaunchError(message) = session {
            return Err(anyhow!(message));
        }
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        let id = format!("scripted-{n}");
        self.running.borrow_mut().insert(id.clone(), (session, 0));
        Ok(id)
    }

    fn poll(&self, session_id: &str) -> Result<SessionPoll> {
        let mut running = self.running.borrow_mut();
        let (session, polls) = running
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session {session_id}"))?;
        *polls += 1;
        let poll = match &*session {
            ScriptedSession::CompletesAfter { polls: after, output } if *polls >= *after => {
                SessionPoll::completed(output.clone())
            }
            ScriptedSession::CompletesAfter { .. } => SessionPoll::started(),
            ScriptedSession::Fails(error) => SessionPoll::failed(error.clone()),
            ScriptedSession::LaunchError(message) => SessionPoll::failed(message.clone()),
        };
        Ok(poll)
    }
}

/// Gate that answers from a queue and records every request.
///
/// An exhausted queue vetoes. `Err(msg)` entries make `present` fail.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    answers: RefCell<VecDeque<Result<Option<usize>, String>>>,
    requests: RefCell<Vec<EscalationRequest>>,
}

impl ScriptedGate {
    pub fn new(answers: Vec<Result<Option<usize>, String>>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<EscalationRequest> {
        self.requests.borrow().clone()
    }
}

impl EscalationGate for ScriptedGate {
    fn present(&self, request: &EscalationRequest) -> Result<Option<usize>> {
        self.requests.borrow_mut().push(request.clone());
        match self.answers.borrow_mut().pop_front() {
            Some(Ok(choice)) => Ok(choice),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(None),
        }
    }
}
