//! Context snapshots.
//!
//! A snapshot is the written memory an agent restarts from: progress
//! summary, touched files, recent commits, and the comm document at
//! capture time. Snapshots are append-only on disk; respawns read the
//! latest one per (agent, task).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted snapshot of an agent's progress on one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub agent_id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub commits: Vec<String>,
    /// The full comm document at capture time.
    #[serde(rename = "busStateJSON", default)]
    pub bus_state_json: Value,
}

impl ContextSnapshot {
    /// File stem used for persistence: `<agentId>_<taskId>_<unixMs>`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.agent_id,
            self.task_id,
            self.timestamp.timestamp_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_keys() {
        let snapshot = ContextSnapshot {
            agent_id: "developer-1".into(),
            task_id: "T001".into(),
            timestamp: Utc::now(),
            summary: "scaffolding done".into(),
            files_modified: vec!["src/main.rs".into()],
            commits: vec!["abc1234 scaffold".into()],
            bus_state_json: serde_json::json!({"_meta": {"version": "1.0"}}),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["agentId"], "developer-1");
        assert_eq!(value["taskId"], "T001");
        assert!(value.get("busStateJSON").is_some());
        assert_eq!(value["filesModified"][0], "src/main.rs");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = ContextSnapshot {
            agent_id: "developer-1".into(),
            task_id: "T001".into(),
            timestamp: Utc::now(),
            summary: String::new(),
            files_modified: vec![],
            commits: vec![],
            bus_state_json: Value::Null,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ContextSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn test_file_stem_format() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        let snapshot = ContextSnapshot {
            agent_id: "developer-1".into(),
            task_id: "T001".into(),
            timestamp: ts,
            summary: String::new(),
            files_modified: vec![],
            commits: vec![],
            bus_state_json: Value::Null,
        };
        assert_eq!(
            snapshot.file_stem(),
            format!("developer-1_T001_{}", ts.timestamp_millis())
        );
    }
}
