//! Decomposition agent: splits a composite task into ordered subtasks.
//!
//! Failures here never abort a run. A worker failure or an unparseable
//! response falls back to a fixed three-step plan so the tree keeps moving.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::{Validator, validator_for};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Decomposition, DecompositionResponse};
use crate::error::MdapError;
use crate::io::config::RunConfig;
use crate::io::prompt::PromptEngine;
use crate::io::worker::{PollPolicy, SessionStatus, Worker, await_session};
use crate::tree::{TaskNode, TreeError};

const DECOMPOSITION_SCHEMA: &str = include_str!("../../schemas/decomposition.schema.json");

/// Descriptions with at most this many tokens are solved directly.
const MINIMAL_TOKEN_COUNT: usize = 3;

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json object pattern must compile"));

/// Why a node is solved directly without asking the worker, if it is.
///
/// Checked in order: explicit flag, existing children (never minimal),
/// token count, then the depth ceiling.
pub fn minimal_reason(node: &TaskNode, max_depth: u32) -> Option<String> {
    if node.is_minimal {
        return Some("already marked minimal".to_string());
    }
    if !node.children.is_empty() {
        return None;
    }
    let tokens = node.description.split_whitespace().count();
    if tokens <= MINIMAL_TOKEN_COUNT {
        return Some(format!("description has {tokens} tokens"));
    }
    if node.depth >= max_depth {
        return Some(format!(
            "depth {} reached max_recursion_depth {max_depth}",
            node.depth
        ));
    }
    None
}

/// Slice from the leftmost `{` to the rightmost `}`.
pub fn extract_json_object(text: &str) -> Result<&str, MdapError> {
    JSON_OBJECT
        .find(text)
        .map(|found| found.as_str())
        .ok_or_else(|| MdapError::DecompositionParse("no JSON object in response".to_string()))
}

/// The fixed plan used whenever the worker cannot produce a usable split.
pub fn fallback_plan(description: &str, reason: &str) -> Decomposition {
    let description = description.trim();
    Decomposition {
        subtasks: vec![
            format!("Step 1: Research and plan for {description}"),
            format!("Step 2: Implement {description}"),
            format!("Step 3: Test and verify {description}"),
        ],
        is_minimal: false,
        rationale: format!("fallback plan: {reason}"),
        fallback_reason: Some(reason.to_string()),
    }
}

/// Decomposition agent wrapper that owns the schema and prompt settings.
pub struct DecomposerAgent {
    prompts: PromptEngine,
    schema: Validator,
    max_depth: u32,
    poll: PollPolicy,
}

impl DecomposerAgent {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let schema_value: Value = serde_json::from_str(DECOMPOSITION_SCHEMA)?;
        let schema = validator_for(&schema_value)
            .map_err(|err| anyhow!("invalid decomposition schema: {}", err))?;
        Ok(Self {
            prompts: PromptEngine::new()?,
            schema,
            max_depth: cfg.max_recursion_depth,
            poll: PollPolicy::from_config(cfg),
        })
    }

    /// Parse a raw worker response into a decomposition response.
    pub fn parse_response(&self, text: &str) -> Result<DecompositionResponse, MdapError> {
        let raw = extract_json_object(text)?;
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| MdapError::DecompositionParse(format!("invalid JSON: {err}")))?;
        let violations: Vec<String> = self
            .schema
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(MdapError::DecompositionParse(format!(
                "schema violation: {}",
                violations.join("; ")
            )));
        }
        serde_json::from_value(value)
            .map_err(|err| MdapError::DecompositionParse(format!("unexpected shape: {err}")))
    }

    /// Decide how to split `node`.
    ///
    /// `node` must not have children yet; resumed composite nodes are walked
    /// by the orchestrator instead.
    #[instrument(skip_all, fields(node_id = %node.id, depth = node.depth))]
    pub fn decompose<W: Worker + ?Sized>(
        &self,
        worker: &W,
        node: &TaskNode,
        parent: Option<&str>,
    ) -> Result<Decomposition> {
        if !node.children.is_empty() {
            return Err(MdapError::from(TreeError::InvalidState(format!(
                "{}: already decomposed",
                node.id
            )))
            .into());
        }
        if let Some(reason) = minimal_reason(node, self.max_depth) {
            debug!(%reason, "solving directly");
            return Ok(Decomposition::minimal(reason));
        }

        let prompt = self
            .prompts
            .render_decompose(node, parent, self.max_depth)?;
        let poll = await_session(worker, &prompt, &node.context, self.poll);
        let text = match (poll.status, poll.output) {
            (SessionStatus::Completed, Some(text)) => text,
            (_, _) => {
                let reason = poll
                    .error
                    .unwrap_or_else(|| "worker returned no output".to_string());
                warn!(%reason, "decomposition request failed, using fallback plan");
                return Ok(fallback_plan(&node.description, &reason));
            }
        };

        let response = match self.parse_response(&text) {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %err, "decomposition response unusable, using fallback plan");
                return Ok(fallback_plan(&node.description, &err.to_string()));
            }
        };

        if response.is_minimal {
            info!("worker marked task minimal");
            return Ok(Decomposition::minimal(response.rationale));
        }

        let subtasks: Vec<String> = response
            .subtasks
            .iter()
            .map(|subtask| subtask.trim())
            .filter(|subtask| !subtask.is_empty())
            .map(str::to_string)
            .collect();
        info!(count = subtasks.len(), "task decomposed");
        Ok(Decomposition {
            subtasks,
            is_minimal: false,
            rationale: response.rationale,
            fallback_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedSession, ScriptedWorker, fast_config};

    const COMPOSITE: &str = "Build a web service with auth and billing";

    fn agent() -> DecomposerAgent {
        DecomposerAgent::new(&fast_config()).expect("agent")
    }

    #[test]
    fn minimality_checks_run_in_order() {
        let mut node = TaskNode::new("n", "just three words", 0);
        assert!(minimal_reason(&node, 4).expect("minimal").contains("3 tokens"));

        node.description = COMPOSITE.to_string();
        assert!(minimal_reason(&node, 4).is_none());
        node.depth = 4;
        assert!(minimal_reason(&node, 4).expect("minimal").contains("depth"));

        node.is_minimal = true;
        assert_eq!(
            minimal_reason(&node, 4).as_deref(),
            Some("already marked minimal")
        );

        let mut parent = TaskNode::new("p", "tiny", 0);
        parent.children.push(TaskNode::new("c", "child", 1));
        assert!(minimal_reason(&parent, 4).is_none());
    }

    #[test]
    fn extracts_leftmost_to_rightmost_braces() {
        let text = "Sure! {\"subtasks\": [\"a {b}\"]} trailing } text";
        assert_eq!(
            extract_json_object(text).expect("extract"),
            "{\"subtasks\": [\"a {b}\"]} trailing }"
        );
        assert!(matches!(
            extract_json_object("no json here"),
            Err(MdapError::DecompositionParse(_))
        ));
    }

    #[test]
    fn parses_subtasks_from_chatty_response() {
        let worker = ScriptedWorker::new(vec![ScriptedSession::completes_after(
            1,
            "Here you go:\n{\"subtasks\": [\"Design schema\", \"  \", \"Write handlers\"], \"rationale\": \"two layers\", \"isMinimal\": false}\n",
        )]);
        let node = TaskNode::new("n", COMPOSITE, 0);

        let got = agent().decompose(&worker, &node, None).expect("decompose");
        assert_eq!(got.subtasks, vec!["Design schema", "Write handlers"]);
        assert_eq!(got.rationale, "two layers");
        assert!(!got.is_minimal);
        assert!(got.fallback_reason.is_none());
        assert!(worker.prompts()[0].contains("Decomposition Contract"));
    }

    #[test]
    fn minimal_response_yields_no_subtasks() {
        let worker = ScriptedWorker::new(vec![ScriptedSession::completes_after(
            1,
            r#"{"subtasks":[],"isMinimal":true}"#,
        )]);
        let node = TaskNode::new("n", COMPOSITE, 0);

        let got = agent().decompose(&worker, &node, None).expect("decompose");
        assert!(got.is_minimal);
        assert!(got.subtasks.is_empty());
    }

    #[test]
    fn unparseable_response_falls_back_to_template() {
        let worker = ScriptedWorker::new(vec![ScriptedSession::completes_after(
            1,
            "I would split this into several parts.",
        )]);
        let node = TaskNode::new("n", COMPOSITE, 0);

        let got = agent().decompose(&worker, &node, None).expect("decompose");
        assert_eq!(got.subtasks.len(), 3);
        assert_eq!(
            got.subtasks[0],
            format!("Step 1: Research and plan for {COMPOSITE}")
        );
        assert_eq!(got.subtasks[1], format!("Step 2: Implement {COMPOSITE}"));
        assert_eq!(got.subtasks[2], format!("Step 3: Test and verify {COMPOSITE}"));
        assert!(got.rationale.contains("no JSON object"));
    }

    #[test]
    fn schema_violation_falls_back() {
        let worker = ScriptedWorker::new(vec![ScriptedSession::completes_after(
            1,
            r#"{"subtasks": "not a list"}"#,
        )]);
        let node = TaskNode::new("n", COMPOSITE, 0);

        let got = agent().decompose(&worker, &node, None).expect("decompose");
        assert!(got.fallback_reason.expect("fallback").contains("schema violation"));
    }

    #[test]
    fn worker_failure_falls_back() {
        let worker = ScriptedWorker::new(vec![ScriptedSession::launch_error("spawn failed")]);
        let node = TaskNode::new("n", COMPOSITE, 0);

        let got = agent().decompose(&worker, &node, None).expect("decompose");
        assert_eq!(got.subtasks.len(), 3);
        assert!(got.rationale.contains("spawn failed"));
    }

    #[test]
    fn depth_ceiling_skips_worker() {
        let worker = ScriptedWorker::new(Vec::new());
        let node = TaskNode::new("n", COMPOSITE, fast_config().max_recursion_depth);

        let got = agent().decompose(&worker, &node, None).expect("decompose");
        assert!(got.is_minimal);
        assert!(worker.prompts().is_empty());
    }

    #[test]
    fn already_decomposed_node_is_rejected() {
        let worker = ScriptedWorker::new(Vec::new());
        let mut node = TaskNode::new("n", COMPOSITE, 0);
        node.children.push(TaskNode::new("c", "child task here please", 1));

        let err = agent().decompose(&worker, &node, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MdapError>(),
            Some(MdapError::TreeInvariant(_))
        ));
    }
}
