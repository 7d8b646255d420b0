//! Git subprocess plumbing.

pub mod branch;

pub use branch::{AgentBranch, BranchManager};

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};

/// Run a git command in `repo`, returning trimmed stdout on success.
pub(crate) async fn run_git(
    repo: &Path,
    operation: &str,
    args: &[&str],
) -> OrchestrationResult<String> {
    let output = Command::new("git")
        .current_dir(repo)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| OrchestrationError::branch(operation, None, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OrchestrationError::branch(
            operation,
            None,
            format!("git {} failed: {}", args.join(" "), stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether a local branch exists in `repo`.
pub(crate) async fn branch_exists(repo: &Path, branch: &str) -> bool {
    Command::new("git")
        .current_dir(repo)
        .args([
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Whether a remote-tracking branch exists in `repo`.
pub(crate) async fn remote_branch_exists(repo: &Path, branch: &str) -> bool {
    Command::new("git")
        .current_dir(repo)
        .args([
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/remotes/origin/{branch}"),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// `git status --porcelain` paths for a working tree.
pub(crate) async fn status_porcelain(repo: &Path) -> OrchestrationResult<Vec<String>> {
    let out = run_git(repo, "status", &["status", "--porcelain"]).await?;
    Ok(out
        .lines()
        .filter_map(|l| l.get(3..).map(str::to_string))
        .collect())
}

/// Up to `n` recent `--oneline` commits on a branch. Missing branches
/// yield an empty list rather than an error; a fresh agent branch may have
/// no commits of its own yet.
pub(crate) async fn recent_commits(repo: &Path, branch: &str, n: usize) -> Vec<String> {
    match run_git(
        repo,
        "log",
        &["log", "--oneline", "-n", &n.to_string(), branch],
    )
    .await
    {
        Ok(out) if out.is_empty() => Vec::new(),
        Ok(out) => out.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}
