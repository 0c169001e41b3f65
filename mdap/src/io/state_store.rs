//! Durable whole-document snapshot of a run (tree + config + metadata).
//!
//! Every write replaces the document via a temp file and `rename`, so readers
//! see either the previous snapshot or the new one, never a partial file.
//! A single writer is assumed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::error::MdapError;
use crate::io::config::RunConfig;
use crate::tree::TaskTree;

/// Persisted snapshot (`{ root, config, metadata }`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(rename = "root", default)]
    pub tree: TaskTree,
    #[serde(default)]
    pub config: Option<RunConfig>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// File-backed store for [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Load the snapshot. A missing file is a fresh run, not an error.
    pub fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no snapshot, starting fresh");
            return Ok(PersistedState::default());
        }
        debug!(path = %self.path.display(), "loading snapshot");
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read snapshot {}", self.path.display()))?;
        let state: PersistedState = serde_json::from_str(&contents)
            .with_context(|| format!("parse snapshot {}", self.path.display()))?;
        if let Some(root) = state.tree.root() {
            let max_depth = state
                .config
                .as_ref()
                .map_or(u32::MAX, |cfg| cfg.max_recursion_depth);
            let errors = validate_invariants(root, max_depth);
            if !errors.is_empty() {
                return Err(anyhow!("snapshot invariants failed: {}", errors.join("; ")));
            }
        }
        Ok(state)
    }

    /// Atomically replace the snapshot (temp file + rename).
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let staged = self.stage(state).map_err(|err| self.write_failure(&err))?;
        self.commit(&staged).map_err(|err| self.write_failure(&err))
    }

    /// First half of [`save`](Self::save): write the temp file only.
    pub fn stage(&self, state: &PersistedState) -> Result<PathBuf> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("snapshot path missing parent {}", self.path.display()))?;
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut buf = serde_json::to_string_pretty(state).context("serialize snapshot")?;
        buf.push('\n');
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
        Ok(tmp_path)
    }

    /// Second half of [`save`](Self::save): move a staged file into place.
    pub fn commit(&self, staged: &Path) -> Result<()> {
        fs::rename(staged, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        debug!(path = %self.path.display(), "snapshot committed");
        Ok(())
    }

    fn write_failure(&self, err: &anyhow::Error) -> anyhow::Error {
        MdapError::PersistenceWrite {
            path: self.path.clone(),
            reason: format!("{err:#}"),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeContext, TaskStatus};

    fn sample_state() -> PersistedState {
        let mut tree = TaskTree::new();
        tree.create_root("root", "ship it", NodeContext::with_repo(Some("/repo".into())))
            .expect("root");
        tree.attach_child("root", "child", "write code", 3)
            .expect("child");
        let mut state = PersistedState {
            tree,
            config: Some(RunConfig::default()),
            metadata: BTreeMap::new(),
        };
        state
            .metadata
            .insert("run_id".to_string(), "run-1".to_string());
        state
    }

    #[test]
    fn missing_snapshot_is_fresh_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        let state = store.load().expect("load");
        assert_eq!(state, PersistedState::default());
        assert!(state.tree.root().is_none());
    }

    #[test]
    fn save_then_load_preserves_tree_and_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("nested/state.json"));
        let state = sample_state();

        store.save(&state).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded, state);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn crash_between_stage_and_commit_keeps_previous_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        let before = sample_state();
        store.save(&before).expect("save");

        let mut after = before.clone();
        after
            .tree
            .find_mut("child")
            .expect("child")
            .transition(TaskStatus::InProgress)
            .expect("transition");
        let staged = store.stage(&after).expect("stage");
        assert!(staged.exists());

        let loaded = store.load().expect("load");
        assert_eq!(loaded, before);

        store.commit(&staged).expect("commit");
        assert_eq!(store.load().expect("load"), after);
    }

    #[test]
    fn snapshot_uses_root_config_metadata_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        store.save(&sample_state()).expect("save");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).expect("read")).expect("json");
        assert_eq!(raw["root"]["id"], "root");
        assert_eq!(raw["root"]["children"][0]["depth"], 1);
        assert_eq!(raw["config"]["voting_threshold"], 2);
        assert_eq!(raw["metadata"]["run_id"], "run-1");
    }

    #[test]
    fn load_rejects_broken_invariants() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        let mut state = sample_state();
        state.tree.find_mut("root").expect("root").is_minimal = true;
        store.save(&state).expect("save");

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("minimal node"));
    }

    #[test]
    fn unwritable_location_is_persistence_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write");
        let store = StateStore::new(blocker.join("state.json"));

        let err = store.save(&sample_state()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MdapError>(),
            Some(MdapError::PersistenceWrite { .. })
        ));
    }
}
