//! Run configuration, stored as TOML and echoed into the state snapshot.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::red_flag::Severity;

/// Run configuration (TOML).
///
/// Missing fields default to values suitable for an interactive run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Hard ceiling on tree depth; nodes at this depth are always solved directly.
    pub max_recursion_depth: u32,

    /// Margin `k` the leading candidate needs over the runner-up.
    pub voting_threshold: u32,

    /// Minimum red-flag severity logged at `warn`. Filtering is unaffected.
    pub red_flag_severity_threshold: Severity,

    /// Opaque model identifier exported to worker processes as `MDAP_MODEL`.
    pub model_name: Option<String>,

    /// Worker sessions launched per voting round.
    pub batch_size: usize,

    /// Voting rounds before escalating.
    pub max_rounds: u32,

    /// Reported alongside each vote outcome; never ends voting early.
    pub confidence_threshold: f64,

    pub poll_interval_ms: u64,

    /// Polls per voting round (and per decomposition request) before
    /// unresolved sessions are treated as timed out.
    pub max_polls_per_round: u32,

    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command launched per session; the prompt is written to stdin.
    pub command: Vec<String>,
    /// Wall-clock limit for one worker process.
    pub session_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            session_timeout_secs: 15 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 4,
            voting_threshold: 2,
            red_flag_severity_threshold: Severity::Low,
            model_name: None,
            batch_size: 3,
            max_rounds: 5,
            confidence_threshold: 0.6,
            poll_interval_ms: 500,
            max_polls_per_round: 1200,
            worker: WorkerConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.voting_threshold == 0 {
            return Err(anyhow!("voting_threshold must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be > 0"));
        }
        if self.max_rounds == 0 {
            return Err(anyhow!("max_rounds must be > 0"));
        }
        if self.max_polls_per_round == 0 {
            return Err(anyhow!("max_polls_per_round must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        if self.worker.session_timeout_secs == 0 {
            return Err(anyhow!("worker.session_timeout_secs must be > 0"));
        }
        if self.worker.output_limit_bytes == 0 {
            return Err(anyhow!("worker.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
