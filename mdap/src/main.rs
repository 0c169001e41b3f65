//! Recursive decompose-and-vote task runner.
//!
//! Keeps the whole run in one JSON snapshot (`.mdap/state.json` by default)
//! that is rewritten after every node transition, so an interrupted run can
//! be picked up again with `mdap resume`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mdap::core::ids::UuidIds;
use mdap::core::selector::{next_open_node, summarize_tree};
use mdap::exit_codes;
use mdap::io::config::load_config;
use mdap::io::escalation::{EscalationGate, StdinGate, VetoGate};
use mdap::io::state_store::StateStore;
use mdap::io::worker::ProcessWorker;
use mdap::orchestrator::{Orchestrator, RunReport};
use mdap::tree::TaskStatus;

const DEFAULT_STATE: &str = ".mdap/state.json";
const DEFAULT_CONFIG: &str = ".mdap/config.toml";
const STATUS_MAX_LINES: usize = 200;

#[derive(Parser)]
#[command(
    name = "mdap",
    version,
    about = "Recursive decompose-and-vote task runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new run for GOAL. Fails if the snapshot already holds a run.
    Run {
        goal: String,
        #[arg(long, default_value = DEFAULT_STATE)]
        state: PathBuf,
        /// TOML run configuration (defaults apply if the file is missing).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Working directory handed to every worker session.
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Veto instead of asking on stdin when consensus is not reached.
        #[arg(long)]
        no_escalation: bool,
    },
    /// Continue the run stored in the snapshot from its first open node.
    Resume {
        #[arg(long, default_value = DEFAULT_STATE)]
        state: PathBuf,
        /// Override the configuration stored in the snapshot.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        no_escalation: bool,
    },
    /// Print the task tree and completion ratio.
    Status {
        #[arg(long, default_value = DEFAULT_STATE)]
        state: PathBuf,
    },
}

fn main() {
    mdap::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            goal,
            state,
            config,
            repo,
            no_escalation,
        } => cmd_run(&goal, &state, config.as_deref(), repo.as_deref(), no_escalation),
        Command::Resume {
            state,
            config,
            no_escalation,
        } => cmd_resume(&state, config.as_deref(), no_escalation),
        Command::Status { state } => cmd_status(&state),
    }
}

fn cmd_run(
    goal: &str,
    state: &Path,
    config: Option<&Path>,
    repo: Option<&Path>,
    no_escalation: bool,
) -> Result<i32> {
    let cfg = load_config(config.unwrap_or(Path::new(DEFAULT_CONFIG)))?;
    let repo = match repo {
        Some(dir) => {
            let dir = dir
                .canonicalize()
                .with_context(|| format!("resolve repository {}", dir.display()))?;
            if !dir.is_dir() {
                bail!("repository {} is not a directory", dir.display());
            }
            Some(dir.display().to_string())
        }
        None => None,
    };

    let ids = UuidIds;
    let worker = ProcessWorker::new(&cfg, UuidIds);
    let gate = escalation_gate(no_escalation);
    let mut orchestrator =
        Orchestrator::open(StateStore::new(state), cfg, &worker, gate.as_ref(), &ids)?;
    let report = orchestrator.start(goal, repo)?;
    Ok(report_exit(&report))
}

fn cmd_resume(state: &Path, config: Option<&Path>, no_escalation: bool) -> Result<i32> {
    let store = StateStore::new(state);
    let cfg = match config {
        Some(path) => load_config(path)?,
        None => store.load()?.config.unwrap_or_default(),
    };

    let ids = UuidIds;
    let worker = ProcessWorker::new(&cfg, UuidIds);
    let gate = escalation_gate(no_escalation);
    let mut orchestrator = Orchestrator::open(store, cfg, &worker, gate.as_ref(), &ids)?;
    let report = orchestrator.resume()?;
    Ok(report_exit(&report))
}

fn cmd_status(state: &Path) -> Result<i32> {
    let snapshot = StateStore::new(state).load()?;
    let root = snapshot
        .tree
        .root()
        .with_context(|| format!("no run recorded in {}", state.display()))?;

    println!("{}", summarize_tree(root, STATUS_MAX_LINES));
    println!(
        "completion: {:.1}%",
        snapshot.tree.completion_ratio() * 100.0
    );
    match root.status {
        TaskStatus::Completed => Ok(exit_codes::OK),
        TaskStatus::Failed => Ok(exit_codes::FAILED),
        TaskStatus::Pending | TaskStatus::InProgress => {
            if let Some(next) = next_open_node(root) {
                println!("next: {}", next.id);
            }
            Ok(exit_codes::INCOMPLETE)
        }
    }
}

fn escalation_gate(no_escalation: bool) -> Box<dyn EscalationGate> {
    if no_escalation {
        Box::new(VetoGate)
    } else {
        Box::new(StdinGate::terminal())
    }
}

fn report_exit(report: &RunReport) -> i32 {
    println!("{} {}", report.root_id, report.status.as_str());
    if let Some(result) = &report.result {
        println!("{result}");
    }
    if let Some(reason) = &report.failure_reason {
        eprintln!("root failed: {reason}");
    }
    if report.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_defaults() {
        let cli = Cli::parse_from(["mdap", "run", "Build a thing"]);
        match cli.command {
            Command::Run {
                goal,
                state,
                config,
                repo,
                no_escalation,
            } => {
                assert_eq!(goal, "Build a thing");
                assert_eq!(state, PathBuf::from(DEFAULT_STATE));
                assert!(config.is_none());
                assert!(repo.is_none());
                assert!(!no_escalation);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_resume_flags() {
        let cli = Cli::parse_from([
            "mdap",
            "resume",
            "--state",
            "s.json",
            "--no-escalation",
        ]);
        assert!(matches!(
            cli.command,
            Command::Resume {
                no_escalation: true,
                ..
            }
        ));
    }

    #[test]
    fn run_requires_goal() {
        assert!(Cli::try_parse_from(["mdap", "run"]).is_err());
    }
}
