//! Configuration loading.

pub mod loader;

pub use loader::{apply_env_overrides, ConfigError, ConfigLoader, ENV_PREFIX};
