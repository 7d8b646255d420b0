//! Task claiming for role-typed personas.
//!
//! All mutation of task status goes through here. A claim is a
//! compare-and-swap under the plan lock: two loops racing for the same
//! task succeed for exactly one.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{Task, TaskStatus};
use crate::services::plan_model::PlanModel;

/// Aggregate task counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub available: usize,
    pub claimed: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub pr_pending: usize,
    pub complete: usize,
}

/// Claim/release/complete operations over the shared plan.
pub struct PersonaMatcher {
    plan: Arc<PlanModel>,
}

impl PersonaMatcher {
    pub fn new(plan: Arc<PlanModel>) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &Arc<PlanModel> {
        &self.plan
    }

    /// Tasks of `role` that are available and not being worked by anyone.
    pub fn get_claimable_tasks(&self, role: &str) -> Vec<Task> {
        self.plan
            .get_available_tasks_for_role(role)
            .into_iter()
            .filter(|t| t.assigned_agent.is_none())
            .collect()
    }

    /// Bind an available task to an agent and branch: AVAILABLE → CLAIMED.
    ///
    /// Fails when the task is unknown, already claimed, or has incomplete
    /// dependencies. The check-and-set runs under the plan write lock.
    pub fn claim_task(
        &self,
        task_id: &str,
        agent_id: &str,
        branch: &str,
    ) -> OrchestrationResult<Task> {
        self.plan.with_state(|state| {
            let completed = state.completed_ids();
            let Some(task) = state.task(task_id) else {
                return Err(OrchestrationError::lifecycle(
                    Some(agent_id),
                    None,
                    format!("cannot claim unknown task {task_id}"),
                ));
            };
            if !state.is_available(task, &completed) {
                return Err(OrchestrationError::lifecycle(
                    Some(agent_id),
                    Some(task.status.as_str()),
                    format!("task {task_id} is not claimable"),
                ));
            }

            let task = state
                .task_mut(task_id)
                .ok_or_else(|| {
                    OrchestrationError::lifecycle(Some(agent_id), None, "task vanished mid-claim")
                })?;
            task.status = TaskStatus::Claimed;
            task.assigned_agent = Some(agent_id.to_string());
            task.branch = Some(branch.to_string());
            task.claimed_at = Some(Utc::now());
            info!(task_id, agent_id, branch, "task claimed");
            Ok(task.clone())
        })
    }

    /// Return a claimed-but-unfinished task to the pool.
    pub fn release_task(&self, task_id: &str) -> OrchestrationResult<()> {
        self.plan.with_state(|state| {
            let Some(task) = state.task_mut(task_id) else {
                return Err(OrchestrationError::lifecycle(
                    None,
                    None,
                    format!("cannot release unknown task {task_id}"),
                ));
            };
            if !task.status.is_assigned() {
                return Err(OrchestrationError::lifecycle(
                    None,
                    Some(task.status.as_str()),
                    format!("task {task_id} is not claimed"),
                ));
            }
            task.status = TaskStatus::Available;
            task.assigned_agent = None;
            task.branch = None;
            task.claimed_at = None;
            info!(task_id, "task released back to pool");
            Ok(())
        })
    }

    /// Finish a task: CLAIMED/IN_PROGRESS/BLOCKED/PR_PENDING → COMPLETE.
    /// Must be called exactly once per task; a second call errors.
    pub fn complete_task(&self, task_id: &str) -> OrchestrationResult<()> {
        self.plan.with_state(|state| {
            PlanModel::complete_task_inner(state, task_id)?;
            info!(task_id, "task complete");
            Ok(())
        })
    }

    /// Record a PR URL against a task.
    pub fn set_task_pr(&self, task_id: &str, pr_url: &str) -> OrchestrationResult<()> {
        self.plan.with_state(|state| {
            let Some(task) = state.task_mut(task_id) else {
                return Err(OrchestrationError::lifecycle(
                    None,
                    None,
                    format!("unknown task {task_id}"),
                ));
            };
            task.pr_url = Some(pr_url.to_string());
            if task.status.is_assigned() {
                task.status = TaskStatus::PrPending;
            }
            Ok(())
        })
    }

    pub fn get_task_stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for task in self.plan.get_all_tasks() {
            stats.total += 1;
            match task.status {
                TaskStatus::Available => stats.available += 1,
                TaskStatus::Claimed => stats.claimed += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::PrPending => stats.pr_pending += 1,
                TaskStatus::Complete => stats.complete += 1,
            }
        }
        stats
    }
}
