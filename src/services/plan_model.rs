//! In-memory plan graph.
//!
//! Query surface over a validated [`ProjectPlan`]. The plan's structure is
//! frozen; task status fields and milestone completion are the only
//! mutable state, guarded by one `RwLock`. Mutation happens exclusively
//! through [`crate::services::PersonaMatcher`] and
//! [`PlanModel::mark_milestone_complete`].

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{Epic, Milestone, Persona, ProjectPlan, Task, TaskStatus};

pub(crate) struct PlanState {
    pub plan: ProjectPlan,
    /// task id → (epic idx, story idx, task idx)
    index: HashMap<String, (usize, usize, usize)>,
}

impl PlanState {
    pub(crate) fn task(&self, id: &str) -> Option<&Task> {
        let &(e, s, t) = self.index.get(id)?;
        Some(&self.plan.epics[e].stories[s].tasks[t])
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        let &(e, s, t) = self.index.get(id)?;
        Some(&mut self.plan.epics[e].stories[s].tasks[t])
    }

    pub(crate) fn completed_ids(&self) -> HashSet<String> {
        self.plan
            .tasks()
            .filter(|t| t.status == TaskStatus::Complete)
            .map(|t| t.id.clone())
            .collect()
    }

    /// AVAILABLE and every dependency complete.
    pub(crate) fn is_available(&self, task: &Task, completed: &HashSet<String>) -> bool {
        task.status == TaskStatus::Available
            && task.dependencies.iter().all(|d| completed.contains(d))
    }
}

/// Thread-safe view of the plan graph.
pub struct PlanModel {
    pub(crate) state: RwLock<PlanState>,
}

impl PlanModel {
    /// Build the model from a validated plan. Duplicate task ids would
    /// have been rejected by validation; the index assumes uniqueness.
    pub fn new(plan: ProjectPlan) -> Self {
        let mut index = HashMap::new();
        for (e, epic) in plan.epics.iter().enumerate() {
            for (s, story) in epic.stories.iter().enumerate() {
                for (t, task) in story.tasks.iter().enumerate() {
                    index.insert(task.id.clone(), (e, s, t));
                }
            }
        }
        Self {
            state: RwLock::new(PlanState { plan, index }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PlanState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.read().plan.tasks().cloned().collect()
    }

    pub fn get_task_by_id(&self, id: &str) -> Option<Task> {
        self.read().task(id).cloned()
    }

    pub fn get_tasks_by_role(&self, role: &str) -> Vec<Task> {
        self.read()
            .plan
            .tasks()
            .filter(|t| t.role == role)
            .cloned()
            .collect()
    }

    /// Tasks of a role that are AVAILABLE with all dependencies complete,
    /// in plan order.
    pub fn get_available_tasks_for_role(&self, role: &str) -> Vec<Task> {
        let state = self.read();
        let completed = state.completed_ids();
        state
            .plan
            .tasks()
            .filter(|t| t.role == role && state.is_available(t, &completed))
            .cloned()
            .collect()
    }

    /// Derived set of completed task ids. Never stored.
    pub fn completed_task_ids(&self) -> HashSet<String> {
        self.read().completed_ids()
    }

    pub fn get_persona_by_role(&self, role: &str) -> Option<Persona> {
        self.read().plan.persona_for_role(role).cloned()
    }

    pub fn personas(&self) -> Vec<Persona> {
        self.read().plan.personas.clone()
    }

    pub fn get_epics_for_milestone(&self, milestone_id: &str) -> Vec<Epic> {
        let state = self.read();
        let Some(milestone) = state.plan.milestones.iter().find(|m| m.id == milestone_id) else {
            return Vec::new();
        };
        state
            .plan
            .epics
            .iter()
            .filter(|e| milestone.epic_ids.contains(&e.id))
            .cloned()
            .collect()
    }

    pub fn milestones(&self) -> Vec<Milestone> {
        self.read().plan.milestones.clone()
    }

    /// A milestone is complete when every task of every story of every
    /// epic it references is complete.
    pub fn is_milestone_complete(&self, milestone_id: &str) -> bool {
        let state = self.read();
        let Some(milestone) = state.plan.milestones.iter().find(|m| m.id == milestone_id) else {
            return false;
        };
        state
            .plan
            .epics
            .iter()
            .filter(|e| milestone.epic_ids.contains(&e.id))
            .flat_map(|e| e.stories.iter())
            .flat_map(|s| s.tasks.iter())
            .all(|t| t.status == TaskStatus::Complete)
    }

    /// Record a milestone's completion and its integration PR.
    pub fn mark_milestone_complete(
        &self,
        milestone_id: &str,
        pr_url: Option<String>,
    ) -> OrchestrationResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let milestone = state
            .plan
            .milestones
            .iter_mut()
            .find(|m| m.id == milestone_id)
            .ok_or_else(|| {
                OrchestrationError::lifecycle(
                    None,
                    None,
                    format!("unknown milestone {milestone_id}"),
                )
            })?;
        milestone.completed = true;
        milestone.pr_url = pr_url;
        Ok(())
    }

    /// Set the claimed task to in-progress. Left to the agent's own status
    /// updates in the normal flow; exposed for recovery paths.
    pub fn mark_in_progress(&self, task_id: &str) -> OrchestrationResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let task = state.task_mut(task_id).ok_or_else(|| {
            OrchestrationError::lifecycle(None, None, format!("unknown task {task_id}"))
        })?;
        if task.status != TaskStatus::Claimed {
            return Err(OrchestrationError::lifecycle(
                task.assigned_agent.as_deref(),
                Some(task.status.as_str()),
                format!("task {task_id} cannot move to in_progress"),
            ));
        }
        task.status = TaskStatus::InProgress;
        Ok(())
    }

    /// Snapshot of the current plan (for status output and tests).
    pub fn plan(&self) -> ProjectPlan {
        self.read().plan.clone()
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut PlanState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Stamp a task complete, used by the matcher.
    pub(crate) fn complete_task_inner(state: &mut PlanState, task_id: &str) -> OrchestrationResult<()> {
        let task = state.task_mut(task_id).ok_or_else(|| {
            OrchestrationError::lifecycle(None, None, format!("unknown task {task_id}"))
        })?;
        if !task.status.is_assigned() {
            return Err(OrchestrationError::lifecycle(
                task.assigned_agent.as_deref(),
                Some(task.status.as_str()),
                format!("task {task_id} is not in a completable state"),
            ));
        }
        task.status = TaskStatus::Complete;
        task.completed_at = Some(Utc::now());
        Ok(())
    }
}
