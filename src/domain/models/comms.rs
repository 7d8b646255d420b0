//! Communications document model.
//!
//! The on-disk document is a single JSON object whose top-level keys are
//! agent names plus a reserved `_meta` block. Writes always emit camelCase
//! keys; legacy snake_case keys are accepted on read through serde aliases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::Breakpoint;

/// Document format version written into `_meta.version`.
pub const COMM_DOC_VERSION: &str = "1.0";

/// Lifecycle state an agent advertises on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Working,
    Blocked,
    PrPending,
    Complete,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Blocked => "blocked",
            Self::PrPending => "pr_pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// States under which a set `breakpoint` field is an actionable
    /// breakpoint for the lifecycle loop.
    pub fn is_breakpoint_state(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked | Self::PrPending)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound request owned by its sender: `[toAgent, text]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry(pub String, pub String);

impl RequestEntry {
    pub fn to_agent(&self) -> &str {
        &self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

/// Completed delivery owned by the original requester:
/// `[fromAgent, description, originalRequest]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEntry(pub String, pub String, pub String);

impl DeliveryEntry {
    pub fn from_agent(&self) -> &str {
        &self.0
    }

    pub fn description(&self) -> &str {
        &self.1
    }

    pub fn original_request(&self) -> &str {
        &self.2
    }
}

/// A request addressed to an agent, as seen by the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub from_agent: String,
    pub request: String,
}

/// A delivery as seen by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub from_agent: String,
    pub description: String,
    pub original_request: String,
}

/// Per-agent record on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentRecord {
    #[serde(default)]
    pub mission: String,
    #[serde(rename = "workingOn", alias = "working_on", default)]
    pub working_on: String,
    #[serde(default)]
    pub done: String,
    #[serde(default)]
    pub next: String,
    /// Outbound mailbox: requests this agent has made of others.
    #[serde(default)]
    pub requests: Vec<RequestEntry>,
    /// Inbound deliveries: requests of this agent that others completed.
    #[serde(default)]
    pub added: Vec<DeliveryEntry>,
    #[serde(rename = "lifecycleState", alias = "lifecycle_state", default)]
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub breakpoint: Option<Breakpoint>,
    #[serde(rename = "lastUpdated", alias = "last_updated", default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Whether the record currently presents an actionable breakpoint.
    pub fn has_breakpoint(&self) -> bool {
        self.lifecycle_state.is_breakpoint_state() && self.breakpoint.is_some()
    }
}

/// The reserved `_meta` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub version: String,
    #[serde(rename = "lastUpdated", alias = "last_updated", default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(rename = "lastUpdatedBy", alias = "last_updated_by", default)]
    pub last_updated_by: Option<String>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            version: COMM_DOC_VERSION.to_string(),
            last_updated: None,
            last_updated_by: None,
        }
    }
}

/// The whole shared document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommDocument {
    #[serde(rename = "_meta", default)]
    pub meta: Meta,
    #[serde(flatten)]
    pub agents: BTreeMap<String, AgentRecord>,
}

impl CommDocument {
    /// Stamp the meta block and the touched record for a mutation authored
    /// by `author`.
    pub fn stamp(&mut self, author: &str) {
        let now = Utc::now();
        self.meta.last_updated = Some(now);
        self.meta.last_updated_by = Some(author.to_string());
        if let Some(record) = self.agents.get_mut(author) {
            record.last_updated = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::Breakpoint;

    #[test]
    fn test_empty_document_wire_shape() {
        let doc = CommDocument::default();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_meta"]["version"], "1.0");
        assert_eq!(value["_meta"]["lastUpdated"], serde_json::Value::Null);
        assert_eq!(value["_meta"]["lastUpdatedBy"], serde_json::Value::Null);
    }

    #[test]
    fn test_record_writes_camel_case() {
        let mut doc = CommDocument::default();
        doc.agents.insert(
            "builder".into(),
            AgentRecord {
                working_on: "UI".into(),
                lifecycle_state: LifecycleState::Working,
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("\"workingOn\""));
        assert!(json.contains("\"lifecycleState\""));
        assert!(!json.contains("\"working_on\""));
    }

    #[test]
    fn test_legacy_snake_case_accepted_on_read() {
        let raw = serde_json::json!({
            "_meta": {
                "version": "1.0",
                "last_updated": "2026-01-01T00:00:00Z",
                "last_updated_by": "builder"
            },
            "builder": {
                "mission": "Build UI",
                "working_on": "layout",
                "lifecycle_state": "blocked",
                "blocked_on": [],
                "requests": [["designer", "mockups please"]],
                "added": [],
                "breakpoint": {
                    "type": "blocked",
                    "task_id": "T002",
                    "blocked_on": ["T001"],
                    "timestamp": "2026-01-01T00:00:00Z"
                }
            }
        });
        let doc: CommDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.meta.last_updated_by.as_deref(), Some("builder"));
        let builder = &doc.agents["builder"];
        assert_eq!(builder.working_on, "layout");
        assert_eq!(builder.lifecycle_state, LifecycleState::Blocked);
        assert_eq!(builder.requests[0].to_agent(), "designer");
        let bp = builder.breakpoint.as_ref().unwrap();
        assert_eq!(bp.blocked_on, vec!["T001".to_string()]);
    }

    #[test]
    fn test_mailbox_entries_serialize_as_arrays() {
        let entry = RequestEntry("designer".into(), "mockups please".into());
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!(["designer", "mockups please"])
        );

        let delivery = DeliveryEntry("designer".into(), "done".into(), "mockups please".into());
        assert_eq!(
            serde_json::to_value(&delivery).unwrap(),
            serde_json::json!(["designer", "done", "mockups please"])
        );
    }

    #[test]
    fn test_has_breakpoint_requires_both_fields() {
        let mut record = AgentRecord::default();
        assert!(!record.has_breakpoint());

        record.breakpoint = Some(Breakpoint::task_complete("T001", "done"));
        assert!(!record.has_breakpoint(), "idle state is not a breakpoint state");

        record.lifecycle_state = LifecycleState::Complete;
        assert!(record.has_breakpoint());

        record.breakpoint = None;
        assert!(!record.has_breakpoint());
    }

    #[test]
    fn test_document_round_trip() {
        let mut doc = CommDocument::default();
        doc.agents.insert(
            "designer".into(),
            AgentRecord {
                mission: "Design the UI".into(),
                added: vec![DeliveryEntry(
                    "builder".into(),
                    "scaffold ready".into(),
                    "need a scaffold".into(),
                )],
                ..Default::default()
            },
        );
        doc.stamp("designer");

        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: CommDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn test_stamp_updates_meta_and_record() {
        let mut doc = CommDocument::default();
        doc.agents.insert("builder".into(), AgentRecord::default());
        doc.stamp("builder");

        assert_eq!(doc.meta.last_updated_by.as_deref(), Some("builder"));
        assert!(doc.meta.last_updated.is_some());
        assert!(doc.agents["builder"].last_updated.is_some());
    }
}
