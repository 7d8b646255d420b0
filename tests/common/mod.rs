//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use orchestrate::domain::models::{
    Epic, Milestone, OrchestrationConfig, Persona, ProjectPlan, Story, Task,
};

/// Initialize a throwaway git repository with `main` and `integration`
/// branches and one commit.
pub fn init_git_repo(dir: &Path) {
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .unwrap_or_else(|e| panic!("git {args:?} failed to start: {e}"));
        assert!(
            status.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&status.stderr)
        );
    };

    git(&["init", "--initial-branch", "main"]);
    git(&["config", "user.name", "test"]);
    git(&["config", "user.email", "test@example.com"]);
    std::fs::write(dir.join("README.md"), "# test repo\n").unwrap();
    git(&["add", "."]);
    git(&["commit", "-m", "initial commit"]);
    git(&["branch", "integration"]);
}

/// Add a commit to a branch (checks the branch out).
pub fn commit_on_branch(dir: &Path, branch: &str, file: &str, content: &str) {
    let git = |args: &[&str]| {
        let out = Command::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    };
    git(&["checkout", branch]);
    std::fs::write(dir.join(file), content).unwrap();
    git(&["add", "."]);
    git(&["commit", "-m", &format!("add {file}")]);
}

/// A single-epic plan with the given tasks and one persona per distinct
/// role.
pub fn plan_with_tasks(tasks: Vec<Task>) -> ProjectPlan {
    let mut roles: Vec<String> = tasks.iter().map(|t| t.role.clone()).collect();
    roles.sort();
    roles.dedup();

    ProjectPlan {
        name: "test-plan".into(),
        epics: vec![Epic {
            id: "E001".into(),
            title: "Test epic".into(),
            stories: vec![Story {
                id: "S001".into(),
                title: "Test story".into(),
                epic_id: "E001".into(),
                description: String::new(),
                tasks,
                acceptance_criteria: vec![],
            }],
            milestone_id: Some("M001".into()),
            dependencies: vec![],
        }],
        milestones: vec![Milestone {
            id: "M001".into(),
            title: "Test milestone".into(),
            epic_ids: vec!["E001".into()],
            completed: false,
            pr_url: None,
        }],
        personas: roles
            .into_iter()
            .enumerate()
            .map(|(i, role)| Persona {
                id: format!("P{:03}", i + 1),
                role,
                capabilities: vec![],
                constraints: vec![],
                instruction_template: "You are a {{role}}. Task: {{task}}".into(),
            })
            .collect(),
    }
}

/// Fast test configuration rooted in a temp directory. The agent program
/// is `sleep 300`: a long-lived black box the tests puppet through the
/// comm bus.
pub fn test_config(root: &Path) -> OrchestrationConfig {
    let mut config = OrchestrationConfig::default();
    config.comm_file = root.join("state/comms.json");
    config.snapshot_dir = root.join("state/snapshots");
    config.sandbox_base_dir = root.join("state/sandboxes");
    config.ci_state_dir = root.join("state/ci");
    config.repo_path = root.join("repo");
    config.breakpoint_check_interval_ms = 50;
    config.retry_interval_ms = 100;
    config.poll_interval_ms = 50;
    config.build_delay_ms = 50;
    config.process_timeout_ms = 30_000;
    config.pr_merge_timeout_ms = 10_000;
    config.agent.program = "sleep".into();
    config.agent.args = vec!["300".into()];
    config
}

/// Poll a synchronous predicate until it holds or the timeout expires.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub fn repo_path(root: &Path) -> PathBuf {
    root.join("repo")
}
