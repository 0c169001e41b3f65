//! Worker abstraction for sampling solutions.
//!
//! The [`Worker`] trait decouples the engine from the agent backend. A session
//! is started fire-and-forget and then polled; the engine never cancels a
//! session, timeouts are local bookkeeping only. Tests use scripted workers
//! that return predetermined outputs without spawning processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::ids::IdSource;
use crate::error::MdapError;
use crate::io::config::RunConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::tree::NodeContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Started,
    Completed,
    Failed,
}

/// Snapshot of one worker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPoll {
    pub status: SessionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl SessionPoll {
    pub fn started() -> Self {
        Self {
            status: SessionStatus::Started,
            output: None,
            error: None,
        }
    }

    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Completed,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status != SessionStatus::Started
    }
}

/// Narrow capability to run one task prompt somewhere else.
pub trait Worker {
    /// Launch a session and return its id without waiting for it.
    fn start(&self, prompt: &str, context: &NodeContext) -> Result<String>;

    /// Current state of a previously started session. Once a session has
    /// resolved, implementations may forget it after reporting it.
    fn poll(&self, session_id: &str) -> Result<SessionPoll>;
}

/// Fixed-interval, bounded polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollPolicy {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            interval: cfg.poll_interval(),
            max_polls: cfg.max_polls_per_round,
        }
    }
}

/// Start one session and poll it until it resolves or the budget runs out.
///
/// Launch errors, poll errors and timeouts all come back as a `Failed` poll.
#[instrument(skip_all, fields(max_polls = policy.max_polls))]
pub fn await_session<W: Worker + ?Sized>(
    worker: &W,
    prompt: &str,
    context: &NodeContext,
    policy: PollPolicy,
) -> SessionPoll {
    let session_id = match worker.start(prompt, context) {
        Ok(id) => id,
        Err(err) => {
            let failure = MdapError::WorkerLaunch(format!("{err:#}"));
            warn!(err = %failure, "worker session did not start");
            return SessionPoll::failed(failure.to_string());
        }
    };

    for attempt in 1..=policy.max_polls {
        match worker.poll(&session_id) {
            Ok(poll) if poll.is_resolved() => return poll,
            Ok(_) => {}
            Err(err) => return SessionPoll::failed(format!("poll {session_id}: {err:#}")),
        }
        if attempt < policy.max_polls {
            thread::sleep(policy.interval);
        }
    }

    let timeout = MdapError::WorkerTimeout {
        session_id,
        polls: policy.max_polls,
    };
    warn!(err = %timeout, "worker session unresolved");
    SessionPoll::failed(timeout.to_string())
}

type SessionSlot = Arc<Mutex<Option<SessionPoll>>>;

/// Worker that runs a configured command per session on a background thread.
///
/// The prompt is written to stdin; stdout becomes the session output. The
/// node's `repo` context, when set, is the working directory.
pub struct ProcessWorker<I: IdSource> {
    command: Vec<String>,
    model_name: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    ids: I,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl<I: IdSource> ProcessWorker<I> {
    pub fn new(cfg: &RunConfig, ids: I) -> Self {
        Self {
            command: cfg.worker.command.clone(),
            model_name: cfg.model_name.clone(),
            timeout: Duration::from_secs(cfg.worker.session_timeout_secs),
            output_limit_bytes: cfg.worker.output_limit_bytes,
            ids,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn build_command(&self, context: &NodeContext) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("worker command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(repo) = &context.repo {
            let dir = PathBuf::from(repo);
            if !dir.is_dir() {
                return Err(anyhow!("repository {} is not a directory", dir.display()));
            }
            cmd.current_dir(dir);
        }
        if let Some(model) = &self.model_name {
            cmd.env("MDAP_MODEL", model);
        }
        Ok(cmd)
    }
}

fn poll_from_output(output: Result<CommandOutput>) -> SessionPoll {
    match output {
        Ok(out) if out.timed_out => SessionPoll::failed("worker process timed out"),
        Ok(out) if out.status.success() => SessionPoll::completed(out.stdout_text()),
        Ok(out) => SessionPoll::failed(format!(
            "worker exited with status {:?}: {}",
            out.status.code(),
            out.stderr_summary()
        )),
        Err(err) => SessionPoll::failed(format!("{err:#}")),
    }
}

impl<I: IdSource> Worker for ProcessWorker<I> {
    #[instrument(skip_all, fields(repo = ?context.repo))]
    fn start(&self, prompt: &str, context: &NodeContext) -> Result<String> {
        let cmd = self.build_command(context)?;
        let session_id = self.ids.next_id();
        let slot: SessionSlot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        let input = prompt.as_bytes().to_vec();
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        thread::Builder::new()
            .name(format!("worker-{session_id}"))
            .spawn(move || {
                let poll = poll_from_output(run_command_with_timeout(
                    cmd,
                    Some(input.as_slice()),
                    timeout,
                    limit,
                ));
                if let Ok(mut guard) = writer.lock() {
                    *guard = Some(poll);
                }
            })
            .map_err(|err| anyhow!("spawn worker thread: {err}"))?;

        self.sessions
            .lock()
            .map_err(|_| anyhow!("worker session table poisoned"))?
            .insert(session_id.clone(), slot);
        info!(session_id = %session_id, "worker session started");
        Ok(session_id)
    }

    /// A resolved session is handed out once and then forgotten.
    fn poll(&self, session_id: &str) -> Result<SessionPoll> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("worker session table poisoned"))?;
        let finished = sessions
            .get(session_id)
            .ok_or_else(|| anyhow!("unknown session {session_id}"))?
            .lock()
            .map_err(|_| anyhow!("session {session_id} poisoned"))?
            .take();
        let poll = match finished {
            Some(poll) => {
                sessions.remove(session_id);
                poll
            }
            None => SessionPoll::started(),
        };
        debug!(session_id, status = ?poll.status, "polled worker session");
        Ok(poll)
    }
}
