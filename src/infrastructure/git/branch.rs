//! Branch-per-agent-task isolation.
//!
//! Every (agent, task) pair works on its own branch named
//! `agent/<agentId>/<taskId>`, created from the integration branch.
//! Concurrent edits never collide because sandboxes and branches are both
//! per-agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tracing::{debug, info};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};

use super::{branch_exists, remote_branch_exists, run_git};

/// Record of a created agent branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBranch {
    pub name: String,
    pub agent_id: String,
    pub task_id: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
}

/// Creates and manipulates agent branches in the shared repository.
pub struct BranchManager {
    repo: PathBuf,
    integration_branch: String,
    branches: StdMutex<HashMap<String, AgentBranch>>,
}

impl BranchManager {
    pub fn new(repo: impl Into<PathBuf>, integration_branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            integration_branch: integration_branch.into(),
            branches: StdMutex::new(HashMap::new()),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn integration_branch(&self) -> &str {
        &self.integration_branch
    }

    /// Canonical branch name for an (agent, task) pair.
    pub fn branch_name(agent_id: &str, task_id: &str) -> String {
        format!("agent/{agent_id}/{task_id}")
    }

    /// Create the agent's branch from the integration branch, preferring
    /// `origin/<base>` when a remote-tracking ref exists. Idempotent.
    pub async fn create_agent_branch(
        &self,
        agent_id: &str,
        task_id: &str,
    ) -> OrchestrationResult<AgentBranch> {
        let name = Self::branch_name(agent_id, task_id);
        let base = self.integration_branch.clone();

        // Refresh the base from origin when there is one; a repo without
        // remotes is fine for local-only operation.
        if run_git(&self.repo, "fetch", &["fetch", "origin", &base])
            .await
            .is_err()
        {
            debug!(base = %base, "fetch skipped (no origin or fetch failed)");
        }

        if branch_exists(&self.repo, &name).await {
            debug!(branch = %name, "agent branch already exists");
        } else {
            let start_point = if remote_branch_exists(&self.repo, &base).await {
                format!("origin/{base}")
            } else if branch_exists(&self.repo, &base).await {
                base.clone()
            } else {
                return Err(OrchestrationError::branch(
                    "create",
                    Some(&name),
                    format!("base branch {base} does not exist"),
                ));
            };
            run_git(&self.repo, "create", &["branch", &name, &start_point]).await?;
            info!(branch = %name, base = %start_point, "agent branch created");
        }

        let record = AgentBranch {
            name: name.clone(),
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            base_branch: base,
            created_at: Utc::now(),
        };
        self.branches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent_id.to_string(), record.clone());
        Ok(record)
    }

    pub fn branch_for_agent(&self, agent_id: &str) -> Option<AgentBranch> {
        self.branches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
    }

    pub async fn checkout_branch(&self, name: &str) -> OrchestrationResult<()> {
        run_git(&self.repo, "checkout", &["checkout", name]).await?;
        Ok(())
    }

    /// Merge an agent's branch into `target` (default: integration).
    pub async fn merge_branch(
        &self,
        agent_id: &str,
        target: Option<&str>,
    ) -> OrchestrationResult<()> {
        let branch = self.branch_for_agent(agent_id).ok_or_else(|| {
            OrchestrationError::branch("merge", None, format!("no branch recorded for {agent_id}"))
        })?;
        let target = target.unwrap_or(&self.integration_branch);

        run_git(&self.repo, "merge", &["checkout", target]).await?;
        run_git(
            &self.repo,
            "merge",
            &["merge", "--no-ff", "--no-edit", &branch.name],
        )
        .await?;
        info!(branch = %branch.name, target, "agent branch merged");
        Ok(())
    }

    pub async fn delete_branch(&self, agent_id: &str, force: bool) -> OrchestrationResult<()> {
        let branch = self.branch_for_agent(agent_id).ok_or_else(|| {
            OrchestrationError::branch("delete", None, format!("no branch recorded for {agent_id}"))
        })?;
        let flag = if force { "-D" } else { "-d" };
        run_git(&self.repo, "delete", &["branch", flag, &branch.name]).await?;
        self.branches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(agent_id);
        Ok(())
    }

    /// Commits on `branch` not on `base`, `--oneline` formatted.
    pub async fn get_commits(&self, branch: &str, base: &str) -> OrchestrationResult<Vec<String>> {
        let range = format!("{base}..{branch}");
        let out = run_git(&self.repo, "log", &["log", "--oneline", &range]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Files changed on `branch` relative to the merge base with `base`.
    pub async fn get_changed_files(
        &self,
        branch: &str,
        base: &str,
    ) -> OrchestrationResult<Vec<String>> {
        let range = format!("{base}...{branch}");
        let out = run_git(&self.repo, "diff", &["diff", "--name-only", &range]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub async fn push_branch(&self, name: &str) -> OrchestrationResult<()> {
        run_git(&self.repo, "push", &["push", "-u", "origin", name]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_scheme() {
        assert_eq!(
            BranchManager::branch_name("developer-1", "T001"),
            "agent/developer-1/T001"
        );
    }
}
