//! CI domain values: builds, pull requests, and the events they emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Typed CI event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiEventType {
    BuildStarted,
    BuildSuccess,
    BuildFailure,
    BuildCancelled,
    PrOpened,
    PrClosed,
    PrMerged,
    PrReviewRequested,
    PrApproved,
    PrChangesRequested,
}

impl CiEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildStarted => "build_started",
            Self::BuildSuccess => "build_success",
            Self::BuildFailure => "build_failure",
            Self::BuildCancelled => "build_cancelled",
            Self::PrOpened => "pr_opened",
            Self::PrClosed => "pr_closed",
            Self::PrMerged => "pr_merged",
            Self::PrReviewRequested => "pr_review_requested",
            Self::PrApproved => "pr_approved",
            Self::PrChangesRequested => "pr_changes_requested",
        }
    }
}

impl std::fmt::Display for CiEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A CI event delivered over the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiEvent {
    pub event_type: CiEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl CiEvent {
    pub fn build(event_type: CiEventType, run_id: u64, branch: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            branch: Some(branch.into()),
            run_id: Some(run_id),
            pr_number: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn pull_request(
        event_type: CiEventType,
        pr_number: u64,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            branch: Some(branch.into()),
            run_id: None,
            pr_number: Some(pr_number),
            metadata: BTreeMap::new(),
        }
    }
}

/// Build run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Running,
    Success,
    Failure,
    Cancelled,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Status of one build run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    pub run_id: u64,
    pub branch: String,
    pub state: BuildState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Pull request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// A pull request descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    pub number: u64,
    pub title: String,
    pub source_branch: String,
    pub target_branch: String,
    pub state: PrState,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

impl PrInfo {
    pub fn is_merged(&self) -> bool {
        self.state == PrState::Merged
    }
}

/// A PR create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub source_branch: String,
    pub target_branch: String,
}

/// On-disk PR descriptor: the info plus the body text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrDescriptor {
    #[serde(flatten)]
    pub info: PrInfo,
    #[serde(default)]
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_value(CiEventType::BuildSuccess).unwrap(),
            "build_success"
        );
        assert_eq!(
            serde_json::to_value(CiEventType::PrChangesRequested).unwrap(),
            "pr_changes_requested"
        );
    }

    #[test]
    fn test_ci_event_round_trip() {
        let mut event = CiEvent::build(CiEventType::BuildStarted, 7, "integration");
        event
            .metadata
            .insert("trigger".into(), Value::String("milestone".into()));
        let json = serde_json::to_string(&event).unwrap();
        let back: CiEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_build_status_round_trip() {
        let status = BuildStatus {
            run_id: 3,
            branch: "agent/developer-1/T001".into(),
            state: BuildState::Success,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: BuildStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, back);
        assert!(status.state.is_terminal());
        assert!(!BuildState::Running.is_terminal());
    }

    #[test]
    fn test_pr_descriptor_flattens_info() {
        let descriptor = PrDescriptor {
            info: PrInfo {
                number: 1,
                title: "Milestone M001".into(),
                source_branch: "integration".into(),
                target_branch: "main".into(),
                state: PrState::Open,
                url: "local://pr/1".into(),
                created_at: Utc::now(),
                merged_at: None,
            },
            body: "All epics complete.".into(),
        };
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["number"], 1);
        assert_eq!(value["sourceBranch"], "integration");
        assert_eq!(value["body"], "All epics complete.");

        let back: PrDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(descriptor, back);
    }
}
