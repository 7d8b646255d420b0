//! `orchestrate validate <plan>` — parse and validate a plan file.

use anyhow::Result;
use console::style;
use std::path::Path;

use crate::infrastructure::plan::load_plan;

pub async fn handle_validate(path: &Path, json: bool) -> Result<()> {
    let (plan, report) = load_plan(path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "{} {} — {} epics, {} tasks, {} personas, {} milestones",
        style("valid:").green().bold(),
        path.display(),
        plan.epics.len(),
        plan.task_count(),
        plan.personas.len(),
        plan.milestones.len()
    );
    for warning in &report.warnings {
        println!("{} {warning}", style("warning:").yellow().bold());
    }
    Ok(())
}
