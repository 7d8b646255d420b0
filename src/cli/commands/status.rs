//! `orchestrate status` — one-shot dump of all agent statuses.

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::cli::output::status_table;
use crate::domain::models::OrchestrationConfig;
use crate::services::CommBus;

pub async fn handle_status(
    config: &OrchestrationConfig,
    file: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let path = file.unwrap_or_else(|| config.comm_file.clone());
    let bus = CommBus::new(&path);
    let document = bus.read_raw().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    if document.agents.is_empty() {
        println!(
            "no agents on the bus at {}",
            style(path.display()).cyan()
        );
        return Ok(());
    }

    println!("{}", status_table(&document.agents));
    if let (Some(when), Some(who)) = (
        document.meta.last_updated,
        document.meta.last_updated_by.as_deref(),
    ) {
        println!(
            "last update by {} at {}",
            style(who).bold(),
            when.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
