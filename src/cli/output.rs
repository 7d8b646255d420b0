//! Terminal rendering for agent status.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use std::collections::BTreeMap;

use crate::domain::models::AgentRecord;

/// Render all agent records as a table.
pub fn status_table(agents: &BTreeMap<String, AgentRecord>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Agent",
            "State",
            "Working on",
            "Done",
            "Requests",
            "Deliveries",
            "Last updated",
        ]);

    for (name, record) in agents {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(record.lifecycle_state.as_str()),
            Cell::new(truncate(&record.working_on, 40)),
            Cell::new(truncate(&record.done, 40)),
            Cell::new(record.requests.len()),
            Cell::new(record.added.len()),
            Cell::new(
                record
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    table
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
