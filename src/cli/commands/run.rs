//! `orchestrate run --plan <file>` — drive a fleet to completion.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;

use crate::domain::models::OrchestrationConfig;
use crate::infrastructure::ci::{LocalCiConfig, LocalCiProvider};
use crate::infrastructure::plan::load_plan;
use crate::services::{CiEventBus, Orchestrator};

pub async fn handle_run(
    mut config: OrchestrationConfig,
    plan_path: &Path,
    max_agents: Option<usize>,
    no_auto_spawn: bool,
) -> Result<()> {
    if let Some(max) = max_agents {
        config.max_concurrent_agents = max;
    }
    if no_auto_spawn {
        config.auto_spawn = false;
    }

    let (plan, report) = load_plan(plan_path)
        .await
        .context("plan loading failed")?;
    for warning in &report.warnings {
        println!("{} {warning}", style("warning:").yellow().bold());
    }

    let events = Arc::new(CiEventBus::new(config.event_history_limit));
    let ci = Arc::new(
        LocalCiProvider::new(
            config.repo_path.clone(),
            config.ci_state_dir.clone(),
            events.clone(),
            LocalCiConfig {
                build_delay: std::time::Duration::from_millis(config.build_delay_ms),
                poll_interval: config.poll_interval(),
            },
        )
        .await
        .context("local ci provider setup failed")?,
    );

    let orchestrator = Orchestrator::new(config, plan, ci, events);
    orchestrator.start().await?;
    println!(
        "{} {} agent(s) running",
        style("started:").green().bold(),
        orchestrator.active_agents()
    );

    tokio::select! {
        () = orchestrator.wait_for_completion() => {
            println!("{}", style("all lifecycle loops finished").green());
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", style("interrupt received, stopping fleet").yellow());
            orchestrator.stop().await;
        }
    }

    let stats = orchestrator.matcher().get_task_stats();
    println!(
        "tasks: {} total, {} complete, {} available, {} claimed, {} in progress, {} blocked, {} pr pending",
        stats.total,
        stats.complete,
        stats.available,
        stats.claimed,
        stats.in_progress,
        stats.blocked,
        stats.pr_pending
    );
    Ok(())
}
