//! Instruction file assembly.
//!
//! Builds the CLAUDE.md content injected into an agent's sandbox before
//! every spawn: persona template, task, branch, the latest snapshot
//! summary, and the comm protocol the agent must follow. A fresh process
//! restarts from exactly this written context and nothing else.

use std::path::Path;

use crate::domain::models::{Persona, Task};

/// Assembles per-spawn instruction files.
pub struct InstructionGenerator {
    comm_file_display: String,
}

impl InstructionGenerator {
    pub fn new(comm_file: &Path) -> Self {
        Self {
            comm_file_display: comm_file.display().to_string(),
        }
    }

    /// Render the instruction file for one spawn.
    pub fn render(
        &self,
        agent_id: &str,
        persona: &Persona,
        task: &Task,
        branch: &str,
        snapshot_summary: Option<&str>,
    ) -> String {
        let mut out = String::new();

        let template = substitute(&persona.instruction_template, persona, task, branch);
        if !template.trim().is_empty() {
            out.push_str(template.trim());
            out.push_str("\n\n");
        }

        out.push_str(&format!("# Assignment\n\nYou are `{agent_id}` (role: {role}).\n\nTask `{task_id}`: {description}\n\nWork on branch `{branch}`. Commit as you go.\n\n",
            role = persona.role,
            task_id = task.id,
            description = task.description,
        ));

        if !persona.capabilities.is_empty() {
            out.push_str("## Capabilities\n\n");
            for capability in &persona.capabilities {
                out.push_str(&format!("- {capability}\n"));
            }
            out.push('\n');
        }
        if !persona.constraints.is_empty() {
            out.push_str("## Constraints\n\n");
            for constraint in &persona.constraints {
                out.push_str(&format!("- {constraint}\n"));
            }
            out.push('\n');
        }

        if let Some(summary) = snapshot_summary.filter(|s| !s.trim().is_empty()) {
            out.push_str(&format!(
                "## Previous progress\n\nA prior session on this task left off here:\n\n{summary}\n\nContinue from this point; do not redo finished work.\n\n",
            ));
        }

        out.push_str(&format!(
            "## Coordination\n\n\
             Shared status lives in `{comm}`. Keep your `workingOn`, `done`, and `next` fields current under the `{agent_id}` key.\n\n\
             When you reach a natural stopping point, set `lifecycleState` and write a `breakpoint` object in your record, then stop:\n\
             - finished the task: `lifecycleState: \"complete\"`, breakpoint `{{\"type\": \"task_complete\", \"taskId\": \"{task_id}\", \"summary\": \"...\"}}`\n\
             - blocked on other tasks: `lifecycleState: \"blocked\"`, breakpoint `{{\"type\": \"blocked\", \"taskId\": \"{task_id}\", \"blockedOn\": [\"...\"], \"reason\": \"...\"}}`\n\
             - opened a pull request: `lifecycleState: \"pr_pending\"`, breakpoint `{{\"type\": \"pr_created\", \"taskId\": \"{task_id}\", \"prUrl\": \"...\"}}`\n\
             Include an ISO-8601 `timestamp` in the breakpoint.\n",
            comm = self.comm_file_display,
            task_id = task.id,
        ));

        out
    }
}

fn substitute(template: &str, persona: &Persona, task: &Task, branch: &str) -> String {
    template
        .replace("{{role}}", &persona.role)
        .replace("{{task_id}}", &task.id)
        .replace("{{task}}", &task.description)
        .replace("{{branch}}", branch)
}
