//! Configuration loading.
//!
//! Hierarchical merge via figment, lowest to highest precedence:
//! programmatic defaults, `.orchestrate/config.yaml`,
//! `.orchestrate/local.yaml`, then the `ORCHESTRATION_*` environment
//! overlay. The env overlay is lenient: numeric values are parsed with a
//! locale-independent decimal point, and unparseable values keep the
//! default with a warning instead of failing startup.

use anyhow::{Context, Result};
use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::domain::models::OrchestrationConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ORCHESTRATION_";

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 100")]
    InvalidMaxConcurrentAgents(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Comm file path cannot be empty")]
    EmptyCommFile,

    #[error("Agent program cannot be empty")]
    EmptyAgentProgram,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: defaults → project yaml → local yaml → env.
    pub fn load() -> Result<OrchestrationConfig> {
        let mut config: OrchestrationConfig = Figment::new()
            .merge(Serialized::defaults(OrchestrationConfig::default()))
            .merge(Yaml::file(".orchestrate/config.yaml"))
            .merge(Yaml::file(".orchestrate/local.yaml"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file plus the env overlay.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestrationConfig> {
        let mut config: OrchestrationConfig = Figment::new()
            .merge(Serialized::defaults(OrchestrationConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &OrchestrationConfig) -> Result<(), ConfigError> {
        if config.max_concurrent_agents == 0 || config.max_concurrent_agents > 100 {
            return Err(ConfigError::InvalidMaxConcurrentAgents(
                config.max_concurrent_agents,
            ));
        }
        if config.comm_file.as_os_str().is_empty() {
            return Err(ConfigError::EmptyCommFile);
        }
        if config.agent.program.is_empty() {
            return Err(ConfigError::EmptyAgentProgram);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        Ok(())
    }
}

/// Apply the `ORCHESTRATION_*` overlay. `lookup` abstracts the environment
/// so tests do not mutate the process env.
pub fn apply_env_overrides(
    config: &mut OrchestrationConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

    if let Some(value) = get("COMM_FILE") {
        config.comm_file = PathBuf::from(value);
    }
    if let Some(value) = get("INTEGRATION_BRANCH") {
        config.integration_branch = value;
    }
    if let Some(value) = get("SNAPSHOT_DIR") {
        config.snapshot_dir = PathBuf::from(value);
    }
    if let Some(value) = get("SANDBOX_BASE_DIR") {
        config.sandbox_base_dir = PathBuf::from(value);
    }

    parse_ms(get("POLL_INTERVAL"), "POLL_INTERVAL", &mut config.poll_interval_ms);
    parse_ms(
        get("BREAKPOINT_CHECK_INTERVAL"),
        "BREAKPOINT_CHECK_INTERVAL",
        &mut config.breakpoint_check_interval_ms,
    );
    parse_ms(get("RETRY_INTERVAL"), "RETRY_INTERVAL", &mut config.retry_interval_ms);
    parse_ms(
        get("PR_MERGE_TIMEOUT"),
        "PR_MERGE_TIMEOUT",
        &mut config.pr_merge_timeout_ms,
    );
    parse_ms(
        get("PROCESS_TIMEOUT"),
        "PROCESS_TIMEOUT",
        &mut config.process_timeout_ms,
    );

    if let Some(raw) = get("MAX_RETRIES") {
        match parse_number(&raw) {
            Some(n) => config.max_retries = n as u32,
            None => warn!(value = %raw, "unparseable ORCHESTRATION_MAX_RETRIES, keeping default"),
        }
    }
    if let Some(raw) = get("MAX_CONCURRENT_AGENTS") {
        match parse_number(&raw) {
            Some(n) if n >= 1.0 => config.max_concurrent_agents = n as usize,
            _ => warn!(
                value = %raw,
                "unparseable ORCHESTRATION_MAX_CONCURRENT_AGENTS, keeping default"
            ),
        }
    }
}

fn parse_ms(raw: Option<String>, name: &str, target: &mut u64) {
    if let Some(raw) = raw {
        match parse_number(&raw) {
            Some(n) if n >= 0.0 => *target = n as u64,
            _ => warn!(value = %raw, variable = name, "unparseable duration, keeping default"),
        }
    }
}

/// Locale-independent numeric parse: integers or decimal-point floats.
fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}
