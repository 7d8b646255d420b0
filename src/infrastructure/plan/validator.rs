//! Plan validation.
//!
//! Structural checks over a parsed plan: ID uniqueness across every entity
//! kind, reference integrity, and dependency acyclicity are fatal; role
//! coverage gaps are warnings.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::ProjectPlan;

/// Non-fatal findings from validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Validate a plan. Errors are collected and returned together as one
/// [`OrchestrationError::PlanValidation`].
pub fn validate_plan(plan: &ProjectPlan) -> OrchestrationResult<ValidationReport> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Unique IDs across epics, stories, tasks, milestones, and personas.
    let mut ids: HashSet<String> = HashSet::new();
    let mut duplicate = |kind: &str, id: &str| -> Option<String> {
        if ids.insert(id.to_string()) {
            None
        } else {
            Some(format!("duplicate id {id} ({kind})"))
        }
    };

    for epic in &plan.epics {
        if let Some(e) = duplicate("epic", &epic.id) {
            errors.push(e);
        }
        for story in &epic.stories {
            if let Some(e) = duplicate("story", &story.id) {
                errors.push(e);
            }
            if story.epic_id != epic.id {
                errors.push(format!(
                    "story {} declares epic_id {} but belongs to epic {}",
                    story.id, story.epic_id, epic.id
                ));
            }
            for task in &story.tasks {
                if let Some(e) = duplicate("task", &task.id) {
                    errors.push(e);
                }
            }
        }
    }
    for milestone in &plan.milestones {
        if let Some(e) = duplicate("milestone", &milestone.id) {
            errors.push(e);
        }
    }
    for persona in &plan.personas {
        if let Some(e) = duplicate("persona", &persona.id) {
            errors.push(e);
        }
    }

    // Reference integrity.
    let task_ids: HashSet<&str> = plan.tasks().map(|t| t.id.as_str()).collect();
    let epic_ids: HashSet<&str> = plan.epics.iter().map(|e| e.id.as_str()).collect();
    let milestone_ids: HashSet<&str> = plan.milestones.iter().map(|m| m.id.as_str()).collect();

    for task in plan.tasks() {
        for dep in &task.dependencies {
            if !task_ids.contains(dep.as_str()) {
                errors.push(format!("task {} depends on unknown task {dep}", task.id));
            }
            if dep == &task.id {
                errors.push(format!("task {} depends on itself", task.id));
            }
        }
    }
    for epic in &plan.epics {
        if let Some(milestone_id) = &epic.milestone_id {
            if !milestone_ids.contains(milestone_id.as_str()) {
                errors.push(format!(
                    "epic {} references unknown milestone {milestone_id}",
                    epic.id
                ));
            }
        }
        for dep in &epic.dependencies {
            if !epic_ids.contains(dep.as_str()) {
                errors.push(format!("epic {} depends on unknown epic {dep}", epic.id));
            }
        }
    }
    for milestone in &plan.milestones {
        for epic_id in &milestone.epic_ids {
            if !epic_ids.contains(epic_id.as_str()) {
                errors.push(format!(
                    "milestone {} references unknown epic {epic_id}",
                    milestone.id
                ));
            }
        }
    }

    // Dependency acyclicity.
    if let Some(cycle) = detect_cycle(plan) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    // Role coverage (warnings only).
    let persona_roles: HashSet<&str> = plan.personas.iter().map(|p| p.role.as_str()).collect();
    let task_roles: HashSet<&str> = plan.tasks().map(|t| t.role.as_str()).collect();
    for role in &task_roles {
        if !persona_roles.contains(role) {
            warnings.push(format!("no persona covers role {role}"));
        }
    }
    for role in &persona_roles {
        if !task_roles.contains(role) {
            warnings.push(format!("persona role {role} has no tasks"));
        }
    }

    if errors.is_empty() {
        Ok(ValidationReport { warnings })
    } else {
        Err(OrchestrationError::PlanValidation { errors, warnings })
    }
}

/// DFS cycle detection over the task dependency graph. Returns the cycle
/// path when one exists.
fn detect_cycle(plan: &ProjectPlan) -> Option<Vec<String>> {
    let graph: HashMap<&str, &[String]> = plan
        .tasks()
        .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> bool {
        visited.insert(node);
        in_stack.insert(node);
        path.push(node);

        if let Some(deps) = graph.get(node) {
            for dep in deps.iter() {
                let dep = dep.as_str();
                if !graph.contains_key(dep) {
                    continue;
                }
                if !visited.contains(dep) {
                    if visit(dep, graph, visited, in_stack, path) {
                        return true;
                    }
                } else if in_stack.contains(dep) {
                    if let Some(start) = path.iter().position(|&n| n == dep) {
                        path.drain(..start);
                    }
                    return true;
                }
            }
        }

        in_stack.remove(node);
        path.pop();
        false
    }

    for &node in graph.keys() {
        if !visited.contains(node)
            && visit(node, &graph, &mut visited, &mut in_stack, &mut path)
        {
            return Some(path.iter().map(|s| s.to_string()).collect());
        }
    }
    None
}
