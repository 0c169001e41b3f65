//! Consensus voting agent for minimal tasks.
//!
//! Each round fans out a fixed batch of worker sessions, polls them at a
//! fixed interval, drops red-flagged outputs and tallies the rest. The first
//! candidate to lead the runner-up by `k` votes wins. If the round budget runs
//! out, the ranked candidates go to the escalation gate.

use std::thread;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::red_flag::{self, Severity};
use crate::core::tally::VoteTally;
use crate::core::types::{CandidateVotes, VoteOutcome};
use crate::error::MdapError;
use crate::io::config::RunConfig;
use crate::io::escalation::{EscalationGate, EscalationOption, EscalationRequest};
use crate::io::prompt::PromptEngine;
use crate::io::worker::{PollPolicy, SessionPoll, SessionStatus, Worker};
use crate::tree::{NodeContext, TaskNode};

/// Voting parameters taken from the run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingSettings {
    pub margin: u32,
    pub batch_size: usize,
    pub max_rounds: u32,
    pub confidence_threshold: f64,
    pub severity_threshold: Severity,
    pub poll: PollPolicy,
}

impl VotingSettings {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            margin: cfg.voting_threshold,
            batch_size: cfg.batch_size,
            max_rounds: cfg.max_rounds,
            confidence_threshold: cfg.confidence_threshold,
            severity_threshold: cfg.red_flag_severity_threshold,
            poll: PollPolicy::from_config(cfg),
        }
    }
}

pub struct VoterAgent {
    prompts: PromptEngine,
    settings: VotingSettings,
}

struct PendingSession {
    id: String,
    resolved: Option<SessionPoll>,
}

impl VoterAgent {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        Ok(Self {
            prompts: PromptEngine::new()?,
            settings: VotingSettings::from_config(cfg),
        })
    }

    pub fn settings(&self) -> &VotingSettings {
        &self.settings
    }

    /// Run consensus voting for a minimal node.
    ///
    /// Sample failures and escalation failures are absorbed into a
    /// "no winner" outcome; only prompt rendering can error.
    #[instrument(skip_all, fields(node_id = %node.id, k = self.settings.margin))]
    pub fn vote<W, G>(
        &self,
        worker: &W,
        gate: &G,
        node: &TaskNode,
        parent: Option<&str>,
    ) -> Result<VoteOutcome>
    where
        W: Worker + ?Sized,
        G: EscalationGate + ?Sized,
    {
        let prompt = self.prompts.render_solve(node, parent)?;
        let mut tally = VoteTally::new();

        for round in 1..=self.settings.max_rounds {
            let samples = self.sample_round(worker, &prompt, &node.context);
            let mut counted = 0usize;
            for sample in samples {
                if let Some(text) = self.screen(&node.id, sample) {
                    tally.record(&text);
                    counted += 1;
                }
            }
            debug!(round, counted, candidates = tally.len(), "round tallied");

            if let Some(leader) = tally.leader_by_margin(self.settings.margin) {
                let ranked = tally.ranked();
                let runner_up = ranked.get(1).map_or(0, |entry| entry.votes);
                let rationale = format!(
                    "leader reached {} votes against runner-up {} (margin {} >= {}) after {} round(s)",
                    leader.votes,
                    runner_up,
                    leader.votes - runner_up,
                    self.settings.margin,
                    round
                );
                let winner = leader.first_seen;
                info!(round, votes = leader.votes, runner_up, "consensus reached");
                return Ok(self.outcome(&tally, Some(winner), round, false, rationale));
            }
        }

        let rounds = self.settings.max_rounds;
        if tally.is_empty() {
            let reason = MdapError::ConsensusNotReached {
                task_id: node.id.clone(),
                reason: format!("no valid candidates after {rounds} round(s)"),
            };
            warn!(err = %reason, "no candidates to escalate");
            return Ok(self.outcome(&tally, None, rounds, false, reason.to_string()));
        }

        Ok(self.escalate(gate, node, &tally, rounds))
    }

    /// Launch one batch and poll it until every session resolves or the
    /// poll budget runs out. Unresolved sessions come back as failures.
    fn sample_round<W: Worker + ?Sized>(
        &self,
        worker: &W,
        prompt: &str,
        context: &NodeContext,
    ) -> Vec<SessionPoll> {
        let mut launch_failures = Vec::new();
        let mut sessions = Vec::with_capacity(self.settings.batch_size);
        for _ in 0..self.settings.batch_size {
            match worker.start(prompt, context) {
                Ok(id) => sessions.push(PendingSession { id, resolved: None }),
                Err(err) => {
                    let failure = MdapError::WorkerLaunch(format!("{err:#}"));
                    warn!(err = %failure, "sample excluded");
                    launch_failures.push(SessionPoll::failed(failure.to_string()));
                }
            }
        }

        let policy = self.settings.poll;
        for attempt in 1..=policy.max_polls {
            for session in sessions.iter_mut().filter(|s| s.resolved.is_none()) {
                match worker.poll(&session.id) {
                    Ok(poll) if poll.is_resolved() => session.resolved = Some(poll),
                    Ok(_) => {}
                    Err(err) => {
                        session.resolved = Some(SessionPoll::failed(format!(
                            "poll {}: {err:#}",
                            session.id
                        )));
                    }
                }
            }
            if sessions.iter().all(|s| s.resolved.is_some()) {
                break;
            }
            if attempt < policy.max_polls {
                thread::sleep(policy.interval);
            }
        }

        sessions
            .into_iter()
            .map(|session| {
                session.resolved.unwrap_or_else(|| {
                    let timeout = MdapError::WorkerTimeout {
                        session_id: session.id,
                        polls: policy.max_polls,
                    };
                    warn!(err = %timeout, "sample excluded");
                    SessionPoll::failed(timeout.to_string())
                })
            })
            .chain(launch_failures)
            .collect()
    }

    /// Output text of a usable sample, or `None` if it failed or was red-flagged.
    fn screen(&self, node_id: &str, sample: SessionPoll) -> Option<String> {
        let text = match (sample.status, sample.output) {
            (SessionStatus::Completed, Some(text)) => text,
            _ => {
                debug!(node_id, error = ?sample.error, "failed sample excluded");
                return None;
            }
        };
        let verdict = red_flag::check(&text);
        if !verdict.flagged {
            return Some(text);
        }
        if verdict.severity >= self.settings.severity_threshold {
            warn!(node_id, severity = %verdict.severity, reason = %verdict.reason, "candidate red-flagged");
        } else {
            debug!(node_id, severity = %verdict.severity, reason = %verdict.reason, "candidate red-flagged");
        }
        None
    }

    fn escalate<G: EscalationGate + ?Sized>(
        &self,
        gate: &G,
        node: &TaskNode,
        tally: &VoteTally,
        rounds: u32,
    ) -> VoteOutcome {
        let ranked = tally.ranked();
        let request = EscalationRequest {
            task_id: node.id.clone(),
            task_description: node.description.clone(),
            options: ranked
                .iter()
                .map(|entry| EscalationOption {
                    text: entry.text.clone(),
                    votes: entry.votes,
                })
                .collect(),
        };
        info!(options = request.options.len(), "escalating to human decision");

        let not_reached = |reason: String| {
            MdapError::ConsensusNotReached {
                task_id: node.id.clone(),
                reason,
            }
            .to_string()
        };

        match gate.present(&request) {
            Ok(Some(index)) if index < ranked.len() => {
                let rationale = format!(
                    "selected option {} of {} at escalation after {rounds} round(s)",
                    index + 1,
                    ranked.len()
                );
                self.outcome(tally, Some(ranked[index].first_seen), rounds, true, rationale)
            }
            Ok(Some(index)) => {
                warn!(index, "escalation returned an out-of-range option, treating as veto");
                let rationale = not_reached(format!("escalation chose invalid option {index}"));
                self.outcome(tally, None, rounds, true, rationale)
            }
            Ok(None) => {
                let rationale = not_reached("all candidates vetoed at escalation".to_string());
                self.outcome(tally, None, rounds, true, rationale)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "escalation failed");
                let rationale = not_reached(format!("escalation failed: {err:#}"));
                self.outcome(tally, None, rounds, true, rationale)
            }
        }
    }

    /// Build the outcome; `winner` is the winner's first-seen index in the tally.
    fn outcome(
        &self,
        tally: &VoteTally,
        winner: Option<usize>,
        rounds: u32,
        escalated: bool,
        rationale: String,
    ) -> VoteOutcome {
        let ranked = tally.ranked();
        let votes: Vec<CandidateVotes> = ranked
            .iter()
            .map(|entry| CandidateVotes {
                text: entry.text.clone(),
                votes: entry.votes,
            })
            .collect();
        let winner_index =
            winner.and_then(|first_seen| ranked.iter().position(|e| e.first_seen == first_seen));
        let total = tally.total_votes();
        let confidence = match winner_index {
            Some(index) if total > 0 => f64::from(votes[index].votes) / f64::from(total),
            _ => 0.0,
        };
        VoteOutcome {
            winner_index,
            confidence,
            meets_confidence_threshold: winner_index.is_some()
                && confidence >= self.settings.confidence_threshold,
            rationale,
            votes,
            rounds,
            escalated,
        }
    }
}
