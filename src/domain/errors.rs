//! Error taxonomy for the orchestration core.
//!
//! Every failure surfaced by the crate is one of these variants. Expected
//! failures (timeouts, validation, recoverable I/O) travel as `Result`s;
//! panics are reserved for broken internal invariants.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Unified error type for the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Plan file could not be parsed. Fatal at startup.
    #[error("plan parse error{}{}: {message}",
        .file.as_deref().map(|f| format!(" in {f}")).unwrap_or_default(),
        .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    PlanParse {
        file: Option<String>,
        line: Option<usize>,
        message: String,
    },

    /// Plan parsed but failed validation. Fatal at startup; warnings are
    /// reported alongside but are not themselves fatal.
    #[error("plan validation failed with {} error(s): {}", .errors.len(), .errors.join("; "))]
    PlanValidation {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    /// An agent process could not be spawned.
    #[error("failed to spawn agent{}{}: {message}",
        .agent_id.as_deref().map(|a| format!(" {a}")).unwrap_or_default(),
        .task_id.as_deref().map(|t| format!(" for task {t}")).unwrap_or_default())]
    AgentSpawn {
        agent_id: Option<String>,
        task_id: Option<String>,
        message: String,
    },

    /// Comm bus I/O or semantic failure. Recoverable per call.
    #[error("communication failure during {operation}{}: {message}",
        .agent_id.as_deref().map(|a| format!(" for agent {a}")).unwrap_or_default())]
    Communication {
        agent_id: Option<String>,
        operation: String,
        message: String,
    },

    /// A git command failed. Recoverable per call.
    #[error("branch operation {operation} failed{}: {message}",
        .branch.as_deref().map(|b| format!(" on {b}")).unwrap_or_default())]
    Branch {
        branch: Option<String>,
        operation: String,
        message: String,
    },

    /// Sandbox filesystem failure. Recoverable per call.
    #[error("workspace failure{}{}: {message}",
        .agent_id.as_deref().map(|a| format!(" for agent {a}")).unwrap_or_default(),
        .path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    Workspace {
        agent_id: Option<String>,
        path: Option<PathBuf>,
        message: String,
    },

    /// A CI provider action failed; the caller decides how to proceed.
    #[error("ci provider {provider} failed during {operation}: {message}")]
    Ci {
        provider: String,
        operation: String,
        message: String,
    },

    /// A lifecycle loop violated an internal invariant. Terminates the
    /// affected agent only.
    #[error("lifecycle invariant violated{}{}: {message}",
        .agent_id.as_deref().map(|a| format!(" for agent {a}")).unwrap_or_default(),
        .state.as_deref().map(|s| format!(" in state {s}")).unwrap_or_default())]
    Lifecycle {
        agent_id: Option<String>,
        state: Option<String>,
        message: String,
    },

    /// A bounded wait expired. The underlying run/PR is not dequeued, so
    /// callers may retry.
    #[error("operation {operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl OrchestrationError {
    pub fn communication(
        operation: impl Into<String>,
        agent_id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Communication {
            agent_id: agent_id.map(String::from),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn branch(
        operation: impl Into<String>,
        branch: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Branch {
            branch: branch.map(String::from),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn workspace(
        agent_id: Option<&str>,
        path: Option<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Workspace {
            agent_id: agent_id.map(String::from),
            path,
            message: message.into(),
        }
    }

    pub fn ci(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Ci {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn lifecycle(
        agent_id: Option<&str>,
        state: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Lifecycle {
            agent_id: agent_id.map(String::from),
            state: state.map(String::from),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether this error is fatal at startup (plan problems) as opposed to
    /// recoverable per call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PlanParse { .. } | Self::PlanValidation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = OrchestrationError::communication("update_field", Some("builder-1"), "disk full");
        let msg = err.to_string();
        assert!(msg.contains("update_field"));
        assert!(msg.contains("builder-1"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_timeout_message() {
        let err = OrchestrationError::timeout("wait_for_pr_merge", 600_000);
        assert_eq!(
            err.to_string(),
            "operation wait_for_pr_merge timed out after 600000 ms"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(OrchestrationError::PlanValidation {
            errors: vec!["dup".into()],
            warnings: vec![],
        }
        .is_fatal());
        assert!(!OrchestrationError::timeout("x", 1).is_fatal());
    }
}
