//! Orchestrate CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use orchestrate::cli::{commands, Cli, Commands};
use orchestrate::infrastructure::{config::ConfigLoader, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Watcher { file } => commands::watcher::handle_watcher(&config, file).await,
        Commands::Agent { name, file } => {
            commands::agent::handle_agent(&config, &name, file).await
        }
        Commands::Status { file } => {
            commands::status::handle_status(&config, file, cli.json).await
        }
        Commands::Run {
            plan,
            max_agents,
            no_auto_spawn,
        } => commands::run::handle_run(config, &plan, max_agents, no_auto_spawn).await,
        Commands::Validate { plan } => commands::validate::handle_validate(&plan, cli.json).await,
    }
}
