//! Project plan domain model.
//!
//! A plan is a hierarchy of milestones, epics, stories, and tasks, plus the
//! personas that may work the tasks. Structure is immutable after
//! validation; only task status fields (and milestone completion) mutate
//! at runtime, and only through [`crate::services::PersonaMatcher`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a task in the claiming pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Ready to be claimed once its dependencies are complete.
    #[default]
    Available,
    /// Bound to an agent and a branch, work not yet reported.
    Claimed,
    /// The assigned agent reported it is actively working.
    InProgress,
    /// The assigned agent reported a blocker.
    Blocked,
    /// A pull request is open for the task's branch.
    PrPending,
    /// Done. Terminal.
    Complete,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::PrPending => "pr_pending",
            Self::Complete => "complete",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(Self::Available),
            "claimed" => Some(Self::Claimed),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "pr_pending" => Some(Self::PrPending),
            "complete" | "completed" => Some(Self::Complete),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Statuses that carry an assigned agent.
    pub fn is_assigned(&self) -> bool {
        matches!(
            self,
            Self::Claimed | Self::InProgress | Self::Blocked | Self::PrPending
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A discrete unit of work claimable by one agent of a matching role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Role required to work this task; matched against persona roles.
    pub role: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Task IDs that must be complete before this task becomes available.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role: role.into(),
            status: TaskStatus::Available,
            dependencies: Vec::new(),
            assigned_agent: None,
            branch: None,
            pr_url: None,
            claimed_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if dep != self.id && !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Check the status/field pairing invariants.
    pub fn validate(&self) -> Result<(), String> {
        if (self.status == TaskStatus::Complete) != self.completed_at.is_some() {
            return Err(format!(
                "task {}: completed_at must be set iff status is complete",
                self.id
            ));
        }
        if self.status.is_assigned() != self.assigned_agent.is_some() {
            return Err(format!(
                "task {}: assigned_agent must be set iff status is claimed/in_progress/blocked/pr_pending",
                self.id
            ));
        }
        Ok(())
    }
}

/// A story groups tasks under shared acceptance criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub epic_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// An epic groups stories; epics may depend on other epics and roll up to
/// a milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub stories: Vec<Story>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A milestone completes when every task in its epics completes; the
/// orchestrator then raises an integration PR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub epic_ids: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// A role-typed agent archetype. The instruction template seeds every
/// spawn of an agent playing this role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub instruction_template: String,
}

/// Root of the plan graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectPlan {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub epics: Vec<Epic>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub personas: Vec<Persona>,
}

impl ProjectPlan {
    /// Iterate every task in plan order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.epics
            .iter()
            .flat_map(|e| e.stories.iter())
            .flat_map(|s| s.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }

    pub fn persona_for_role(&self, role: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ProjectPlan {
        ProjectPlan {
            name: "demo".into(),
            epics: vec![Epic {
                id: "E001".into(),
                title: "Core".into(),
                stories: vec![Story {
                    id: "S001".into(),
                    title: "Setup".into(),
                    epic_id: "E001".into(),
                    description: String::new(),
                    tasks: vec![
                        Task::new("T001", "Scaffold the project", "developer"),
                        Task::new("T002", "Wire CI", "developer").with_dependency("T001"),
                    ],
                    acceptance_criteria: vec!["builds cleanly".into()],
                }],
                milestone_id: Some("M001".into()),
                dependencies: vec![],
            }],
            milestones: vec![Milestone {
                id: "M001".into(),
                title: "v0".into(),
                epic_ids: vec!["E001".into()],
                completed: false,
                pr_url: None,
            }],
            personas: vec![Persona {
                id: "P001".into(),
                role: "developer".into(),
                capabilities: vec!["rust".into()],
                constraints: vec![],
                instruction_template: "You are a {{role}}.".into(),
            }],
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Available,
            TaskStatus::Claimed,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::PrPending,
            TaskStatus::Complete,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_task_invariants() {
        let mut task = Task::new("T001", "desc", "developer");
        assert!(task.validate().is_ok());

        task.status = TaskStatus::Complete;
        assert!(task.validate().is_err());
        task.completed_at = Some(Utc::now());
        assert!(task.validate().is_ok());

        let mut claimed = Task::new("T002", "desc", "developer");
        claimed.status = TaskStatus::Claimed;
        assert!(claimed.validate().is_err());
        claimed.assigned_agent = Some("developer-1".into());
        assert!(claimed.validate().is_ok());
    }

    #[test]
    fn test_with_dependency_skips_self_and_duplicates() {
        let task = Task::new("T001", "desc", "developer")
            .with_dependency("T001")
            .with_dependency("T002")
            .with_dependency("T002");
        assert_eq!(task.dependencies, vec!["T002".to_string()]);
    }

    #[test]
    fn test_plan_serde_round_trip() {
        let plan = sample_plan();
        let json = serde_json::to_string(&plan).unwrap();
        let back: ProjectPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);

        let yaml = serde_yaml::to_string(&plan).unwrap();
        let back: ProjectPlan = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(plan, back);
    }

    #[test]
    fn test_plan_task_iteration() {
        let plan = sample_plan();
        let ids: Vec<&str> = plan.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T001", "T002"]);
        assert_eq!(plan.task_count(), 2);
    }

    #[test]
    fn test_persona_lookup() {
        let plan = sample_plan();
        assert!(plan.persona_for_role("developer").is_some());
        assert!(plan.persona_for_role("designer").is_none());
    }
}
