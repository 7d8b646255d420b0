//! `orchestrate watcher` — log every comm document change until Ctrl-C.

use anyhow::Result;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::models::OrchestrationConfig;
use crate::services::{CommBus, CommWatcher};

/// Observer name; never authors changes, so it hears everything.
const OBSERVER: &str = "_watcher-cli";

pub async fn handle_watcher(config: &OrchestrationConfig, file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(|| config.comm_file.clone());
    println!(
        "{} {}",
        style("Watching").green().bold(),
        style(path.display()).cyan()
    );

    let bus = Arc::new(CommBus::new(path));
    let watcher = CommWatcher::start(bus, config.watch_debounce()).await?;
    let mut changes = watcher.register(OBSERVER);

    loop {
        tokio::select! {
            notice = changes.recv() => {
                let Some(notice) = notice else { break };
                let author = notice.updated_by.as_deref().unwrap_or("<unknown>");
                println!(
                    "{} change by {}",
                    style("»").yellow(),
                    style(author).bold()
                );
                if let Some(record) = notice.updated_by.as_deref().and_then(|a| notice.document.agents.get(a)) {
                    if !record.working_on.is_empty() {
                        println!("    working on: {}", record.working_on);
                    }
                    println!("    state: {}", record.lifecycle_state);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", style("Stopping watcher").dim());
                break;
            }
        }
    }

    watcher.stop().await;
    Ok(())
}
