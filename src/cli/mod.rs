//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Agent fleet orchestration over a shared communications document.
#[derive(Parser, Debug)]
#[command(name = "orchestrate", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON where applicable.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the comm document and log every change.
    Watcher {
        /// Comm document path (defaults to the configured one).
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },

    /// Interactive REPL acting as one named agent.
    Agent {
        /// Agent name to act as.
        name: String,
        /// Comm document path (defaults to the configured one).
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },

    /// Print the status of every agent on the bus.
    Status {
        /// Comm document path (defaults to the configured one).
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },

    /// Run the orchestrator against a plan file.
    Run {
        /// Plan file (YAML).
        #[arg(long)]
        plan: PathBuf,
        /// Override the configured concurrency cap.
        #[arg(long)]
        max_agents: Option<usize>,
        /// Do not auto-spawn agents at start.
        #[arg(long)]
        no_auto_spawn: bool,
    },

    /// Parse and validate a plan file without running anything.
    Validate {
        /// Plan file (YAML).
        plan: PathBuf,
    },
}
