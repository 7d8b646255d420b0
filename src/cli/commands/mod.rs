//! Subcommand handlers.

pub mod agent;
pub mod run;
pub mod status;
pub mod validate;
pub mod watcher;
