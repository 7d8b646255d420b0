//! `orchestrate agent <name>` — interactive REPL acting as one agent.

use anyhow::Result;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::cli::output::status_table;
use crate::domain::models::OrchestrationConfig;
use crate::services::{AgentHandle, CommBus};

const HELP: &str = "\
Commands:
  mission <text>                         set your mission
  working <text>                         set what you are working on
  done <text>                            set what you have finished
  next <text>                            set what you plan next
  request <agent> <text>                 ask another agent for something
  requests                               list requests addressed to you
  complete <agent> <original> | <desc>   fulfil a request you received
  deliveries                             list what others delivered to you
  ack                                    acknowledge (clear) deliveries
  agents                                 list all agents on the bus
  view                                   show your own record
  help                                   this help
  quit                                   leave the REPL";

pub async fn handle_agent(
    config: &OrchestrationConfig,
    name: &str,
    file: Option<PathBuf>,
) -> Result<()> {
    let path = file.unwrap_or_else(|| config.comm_file.clone());
    let bus = Arc::new(CommBus::new(path));
    let handle = AgentHandle::new(name, bus);

    println!(
        "{} acting as {} — type {} for commands",
        style("orchestrate").green().bold(),
        style(name).cyan().bold(),
        style("help").yellow()
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(format!("{name}> ").as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        let outcome = match command {
            "quit" | "exit" => break,
            "help" => {
                println!("{HELP}");
                Ok(())
            }
            "mission" => handle.set_mission(rest).await.map_err(Into::into),
            "working" => handle.set_working_on(rest).await.map_err(Into::into),
            "done" => handle.set_done(rest).await.map_err(Into::into),
            "next" => handle.set_next(rest).await.map_err(Into::into),
            "request" => match rest.split_once(char::is_whitespace) {
                Some((to, text)) if !text.trim().is_empty() => {
                    handle.request(to, text.trim()).await.map_err(Into::into)
                }
                _ => Err(anyhow::anyhow!("usage: request <agent> <text>")),
            },
            "requests" => show_requests(&handle).await,
            "complete" => complete_command(&handle, rest).await,
            "deliveries" => show_deliveries(&handle).await,
            "ack" => handle.acknowledge_deliveries().await.map_err(Into::into),
            "agents" => show_agents(&handle).await,
            "view" => show_view(&handle).await,
            other => Err(anyhow::anyhow!("unknown command: {other} (try `help`)")),
        };

        if let Err(e) = outcome {
            println!("{} {e}", style("error:").red().bold());
        }
    }

    Ok(())
}

/// `complete <agent> <original> | <description>`
async fn complete_command(handle: &AgentHandle, rest: &str) -> Result<()> {
    let usage = || anyhow::anyhow!("usage: complete <agent> <original request> | <description>");
    let (requester, remainder) = rest.split_once(char::is_whitespace).ok_or_else(usage)?;
    let (original, description) = remainder.split_once('|').ok_or_else(usage)?;
    let original = original.trim();
    let description = description.trim();
    if original.is_empty() || description.is_empty() {
        return Err(usage());
    }
    handle
        .complete_request(requester, original, description)
        .await?;
    println!("{}", style("delivered").green());
    Ok(())
}

async fn show_requests(handle: &AgentHandle) -> Result<()> {
    let pending = handle.pending_requests().await?;
    if pending.is_empty() {
        println!("no pending requests");
        return Ok(());
    }
    for request in pending {
        println!(
            "  {} {}: {}",
            style("←").yellow(),
            style(&request.from_agent).bold(),
            request.request
        );
    }
    Ok(())
}

async fn show_deliveries(handle: &AgentHandle) -> Result<()> {
    let deliveries = handle.my_deliveries().await?;
    if deliveries.is_empty() {
        println!("no deliveries");
        return Ok(());
    }
    for delivery in deliveries {
        println!(
            "  {} {} delivered: {} (for: {})",
            style("✓").green(),
            style(&delivery.from_agent).bold(),
            delivery.description,
            delivery.original_request
        );
    }
    Ok(())
}

async fn show_agents(handle: &AgentHandle) -> Result<()> {
    let agents = handle.bus().get_all_agents().await?;
    if agents.is_empty() {
        println!("no agents on the bus yet");
        return Ok(());
    }
    println!("{}", status_table(&agents));
    Ok(())
}

async fn show_view(handle: &AgentHandle) -> Result<()> {
    let record = handle.record().await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
