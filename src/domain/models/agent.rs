//! Agent instance model and lifecycle values.
//!
//! An [`AgentInstance`] is the controller-side record of one persona-typed
//! agent. The lifecycle loop owns the instance for its lifetime; the
//! orchestrator keeps only an id-keyed map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::Persona;

/// Controller-side state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Working,
    Blocked,
    PrPending,
    Complete,
    Failed,
}

impl AgentState {
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
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of natural stopping point an agent declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    TaskComplete,
    Blocked,
    PrCreated,
}

impl BreakpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskComplete => "task_complete",
            Self::Blocked => "blocked",
            Self::PrCreated => "pr_created",
        }
    }
}

/// An agent-declared stopping point, written into the agent's comm record.
///
/// Wire keys are camelCase; snake_case aliases are accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    #[serde(rename = "type")]
    pub kind: BreakpointType,
    #[serde(rename = "taskId", alias = "task_id", default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(rename = "blockedOn", alias = "blocked_on", default)]
    pub blocked_on: Vec<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "prUrl", alias = "pr_url", default)]
    pub pr_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Breakpoint {
    pub fn task_complete(task_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind: BreakpointType::TaskComplete,
            task_id: Some(task_id.into()),
            summary: summary.into(),
            blocked_on: Vec::new(),
            reason: String::new(),
            pr_url: None,
            timestamp: Utc::now(),
        }
    }

    pub fn blocked(
        task_id: impl Into<String>,
        blocked_on: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: BreakpointType::Blocked,
            task_id: Some(task_id.into()),
            summary: String::new(),
            blocked_on,
            reason: reason.into(),
            pr_url: None,
            timestamp: Utc::now(),
        }
    }

    pub fn pr_created(task_id: impl Into<String>, pr_url: impl Into<String>) -> Self {
        Self {
            kind: BreakpointType::PrCreated,
            task_id: Some(task_id.into()),
            summary: String::new(),
            blocked_on: Vec::new(),
            reason: String::new(),
            pr_url: Some(pr_url.into()),
            timestamp: Utc::now(),
        }
    }
}

/// One persona-typed agent as tracked by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub agent_id: String,
    pub role: String,
    pub branch: String,
    pub state: AgentState,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub blocked_on: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub spawn_count: u32,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub breakpoint: Option<Breakpoint>,
    pub persona: Persona,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(
        agent_id: impl Into<String>,
        persona: Persona,
        branch: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            role: persona.role.clone(),
            branch: branch.into(),
            state: AgentState::Working,
            current_task_id: Some(task_id.into()),
            blocked_on: Vec::new(),
            retry_count: 0,
            spawn_count: 0,
            pr_url: None,
            breakpoint: None,
            persona,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Check state/field pairing invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self.state {
            AgentState::Working if self.current_task_id.is_none() => Err(format!(
                "agent {}: working without a current task",
                self.agent_id
            )),
            AgentState::Blocked if self.blocked_on.is_empty() => Err(format!(
                "agent {}: blocked without blockers",
                self.agent_id
            )),
            AgentState::PrPending if self.pr_url.is_none() => Err(format!(
                "agent {}: pr_pending without a pr url",
                self.agent_id
            )),
            _ => Ok(()),
        }
    }
}

/// Terminal outcome of a lifecycle loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoopResult {
    /// The agent ran out of available tasks after completing at least one.
    TaskComplete { tasks_completed: u32 },
    /// The loop ended on the PR path; `merged` distinguishes a successful
    /// merge from an unextractable URL or a merge-wait timeout.
    PrCreated { pr_url: String, merged: bool },
    /// Retry budget exhausted.
    MaxRetries { retry_count: u32 },
    /// Unrecoverable loop error.
    Error { message: String },
    /// External shutdown observed at a checkpoint.
    Shutdown,
}
