//! Orchestration configuration.
//!
//! A frozen configuration value loaded once at process start. Tests build
//! overrides through struct update syntax rather than mutating any global.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// When set, logs are also written to daily-rotated files here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

/// How to launch the black-box agent program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCommandConfig {
    /// Executable name or path.
    pub program: String,
    /// Fixed arguments prepended to every spawn.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--print".to_string()],
        }
    }
}

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Path to the shared communications document.
    pub comm_file: PathBuf,
    /// Generic poll interval for provider waits and unblock rechecks (ms).
    pub poll_interval_ms: u64,
    /// Comm-record breakpoint poll interval (ms).
    pub breakpoint_check_interval_ms: u64,
    /// Retry budget per lifecycle loop.
    pub max_retries: u32,
    /// Sleep between unblock-wait cycles (ms).
    pub retry_interval_ms: u64,
    /// Bound on waiting for a PR merge (ms).
    pub pr_merge_timeout_ms: u64,
    /// Bound on one agent process producing a breakpoint (ms).
    pub process_timeout_ms: u64,
    /// Long-lived branch agent branches merge into.
    pub integration_branch: String,
    /// Branch milestone PRs target.
    pub main_branch: String,
    /// Spawn-time cap on concurrently running agents.
    pub max_concurrent_agents: usize,
    /// Directory for context snapshot files.
    pub snapshot_dir: PathBuf,
    /// Directory holding per-agent sandboxes.
    pub sandbox_base_dir: PathBuf,
    /// Git repository the fleet works in.
    pub repo_path: PathBuf,
    /// State directory for the local CI provider.
    pub ci_state_dir: PathBuf,
    /// Comm-file watcher debounce (ms); floor 20.
    pub watch_debounce_ms: u64,
    /// Bounded CI event history size.
    pub event_history_limit: usize,
    /// Cap on captured subprocess output lines per agent.
    pub output_capture_limit: usize,
    /// Simulated build duration for the local CI provider (ms).
    pub build_delay_ms: u64,
    /// Whether start() spawns one agent per persona role.
    pub auto_spawn: bool,
    pub agent: AgentCommandConfig,
    pub logging: LoggingConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            comm_file: PathBuf::from(".orchestrate/comms.json"),
            poll_interval_ms: 1_000,
            breakpoint_check_interval_ms: 2_000,
            max_retries: 100,
            retry_interval_ms: 5_000,
            pr_merge_timeout_ms: 600_000,
            process_timeout_ms: 300_000,
            integration_branch: "integration".to_string(),
            main_branch: "main".to_string(),
            max_concurrent_agents: 4,
            snapshot_dir: PathBuf::from(".orchestrate/snapshots"),
            sandbox_base_dir: PathBuf::from(".orchestrate/sandboxes"),
            repo_path: PathBuf::from("."),
            ci_state_dir: PathBuf::from(".orchestrate/ci"),
            watch_debounce_ms: 100,
            event_history_limit: 100,
            output_capture_limit: 1_000,
            build_delay_ms: 500,
            auto_spawn: true,
            agent: AgentCommandConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestrationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn breakpoint_check_interval(&self) -> Duration {
        Duration::from_millis(self.breakpoint_check_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn pr_merge_timeout(&self) -> Duration {
        Duration::from_millis(self.pr_merge_timeout_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    /// Effective watcher debounce, never below the 20 ms floor.
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms.max(20))
    }
}
