//! Snapshot capture and persistence.
//!
//! Before each spawn the loop captures the agent's written memory: git
//! state on its branch, the comm document, and a summary synthesized from
//! the agent's own `done`/`workingOn` fields. Snapshot files are
//! append-only; respawns read the latest per (agent, task).

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::ContextSnapshot;
use crate::infrastructure::git;
use crate::services::comm_bus::CommBus;

/// Writes and retrieves context snapshots.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the current state of an agent's work.
    pub async fn capture(
        &self,
        agent_id: &str,
        task_id: &str,
        branch: &str,
        repo: &Path,
        bus: &CommBus,
    ) -> OrchestrationResult<ContextSnapshot> {
        let files_modified = git::status_porcelain(repo).await.unwrap_or_default();
        let commits = git::recent_commits(repo, branch, 10).await;

        let document = bus.read_raw().await?;
        let summary = match document.agents.get(agent_id) {
            Some(record) => synthesize_summary(&record.done, &record.working_on),
            None => String::new(),
        };
        let bus_state_json = serde_json::to_value(&document).map_err(|e| {
            OrchestrationError::communication("snapshot", Some(agent_id), e.to_string())
        })?;

        Ok(ContextSnapshot {
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            summary,
            files_modified,
            commits,
            bus_state_json,
        })
    }

    /// Persist a snapshot as `<dir>/<agentId>_<taskId>_<unixMs>.json`.
    pub async fn save(&self, snapshot: &ContextSnapshot) -> OrchestrationResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            OrchestrationError::workspace(None, Some(self.dir.clone()), e.to_string())
        })?;

        let path = self.dir.join(format!("{}.json", snapshot.file_stem()));
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            OrchestrationError::workspace(
                Some(&snapshot.agent_id),
                Some(path.clone()),
                e.to_string(),
            )
        })?;
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            OrchestrationError::workspace(
                Some(&snapshot.agent_id),
                Some(path.clone()),
                e.to_string(),
            )
        })?;
        debug!(agent_id = %snapshot.agent_id, path = %path.display(), "snapshot saved");
        Ok(path)
    }

    /// The most recent snapshot for an (agent, task) pair, by the
    /// timestamp embedded in the file name.
    pub async fn latest(
        &self,
        agent_id: &str,
        task_id: &str,
    ) -> OrchestrationResult<Option<ContextSnapshot>> {
        let prefix = format!("{agent_id}_{task_id}_");
        let mut best: Option<(i64, PathBuf)> = None;

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OrchestrationError::workspace(
                    Some(agent_id),
                    Some(self.dir.clone()),
                    e.to_string(),
                ))
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(ts) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|ts| ts.parse::<i64>().ok())
            else {
                continue;
            };
            if best.as_ref().map(|(t, _)| ts > *t).unwrap_or(true) {
                best = Some((ts, entry.path()));
            }
        }

        let Some((_, path)) = best else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
        })?;
        let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
        })?;
        Ok(Some(snapshot))
    }
}

/// Human-readable progress summary from the agent's own status fields.
fn synthesize_summary(done: &str, working_on: &str) -> String {
    match (done.trim(), working_on.trim()) {
        ("", "") => String::new(),
        (done, "") => format!("Done so far: {done}"),
        ("", working_on) => format!("Was working on: {working_on}"),
        (done, working_on) => format!("Done so far: {done}. Was working on: {working_on}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_summary_synthesis() {
        assert_eq!(synthesize_summary("", ""), "");
        assert_eq!(synthesize_summary("layout", ""), "Done so far: layout");
        assert_eq!(
            synthesize_summary("", "errors"),
            "Was working on: errors"
        );
        assert_eq!(
            synthesize_summary("layout", "errors"),
            "Done so far: layout. Was working on: errors"
        );
    }

    #[tokio::test]
    async fn test_save_and_latest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));

        assert!(store.latest("a1", "T001").await.unwrap().is_none());

        let mut snapshot = ContextSnapshot {
            agent_id: "a1".into(),
            task_id: "T001".into(),
            timestamp: Utc::now(),
            summary: "first".into(),
            files_modified: vec![],
            commits: vec![],
            bus_state_json: serde_json::Value::Null,
        };
        store.save(&snapshot).await.unwrap();

        snapshot.summary = "second".into();
        snapshot.timestamp = snapshot.timestamp + chrono::Duration::milliseconds(5);
        store.save(&snapshot).await.unwrap();

        let latest = store.latest("a1", "T001").await.unwrap().unwrap();
        assert_eq!(latest.summary, "second");

        // Other (agent, task) pairs are invisible.
        assert!(store.latest("a1", "T002").await.unwrap().is_none());
        assert!(store.latest("a2", "T001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capture_reads_comm_state() {
        let dir = TempDir::new().unwrap();
        let bus = Arc::new(CommBus::new(dir.path().join("comms.json")));
        bus.update_field("a1", "done", "scaffolding").await.unwrap();
        bus.update_field("a1", "workingOn", "error types").await.unwrap();

        let store = SnapshotStore::new(dir.path().join("snapshots"));
        // A tempdir is not a git repo, so git fields fall back to empty.
        let snapshot = store
            .capture("a1", "T001", "agent/a1/T001", dir.path(), &bus)
            .await
            .unwrap();

        assert_eq!(
            snapshot.summary,
            "Done so far: scaffolding. Was working on: error types"
        );
        assert!(snapshot.bus_state_json.get("a1").is_some());
        assert!(snapshot.commits.is_empty());
    }
}
