use std::path::Path;

use console::{style, StyledObject};

use crate::cli::commands::HistoryArgs;
use crate::cli::runtime::{load_config, open_database};
use crate::errors::NightshiftError;
use crate::models::RunStatus;
use crate::store::{AgentStore, RunHistoryStore};

pub fn styled_status(status: RunStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        RunStatus::Completed => s.green(),
        RunStatus::Failed => s.red().bold(),
        RunStatus::Cancelled => s.yellow(),
        RunStatus::Running => s.cyan(),
    }
}

pub fn format_duration(ms: Option<i64>) -> String {
    match ms {
        Some(ms) if ms >= 60_000 => format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000),
        Some(ms) if ms >= 1000 => format!("{:.1}s", ms as f64 / 1000.0),
        Some(ms) => format!("{}ms", ms),
        None => "-".to_string(),
    }
}

pub async fn handle_history(args: HistoryArgs, config: Option<&Path>) -> Result<(), NightshiftError> {
    let db = open_database(&load_config(config).await?)?;
    let agent = db
        .get_agent(&args.agent_id)?
        .ok_or_else(|| NightshiftError::NotFound(format!("agent '{}'", args.agent_id)))?;
    let runs = db.list_runs(&agent.id, args.limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!("{} ({})", style(&agent.name).bold(), agent.status);
    if runs.is_empty() {
        println!("  no runs yet");
        return Ok(());
    }
    for run in &runs {
        println!(
            "  {}  {:<10}  {:>8}  {}",
            run.start_time.format("%Y-%m-%d %H:%M:%S"),
            styled_status(run.status),
            format_duration(run.duration_ms()),
            style(run.output.as_deref().unwrap_or("")).dim()
        );
        if let Some(error) = &run.error {
            println!("      {}", style(error).red());
        }
        for note in &run.annotations {
            println!("      note: {}", note);
        }
    }
    Ok(())
}
