use std::path::Path;

use console::style;
use tracing::info;

use crate::cli::commands::LogsArgs;
use crate::cli::runtime::{load_config, open_database};
use crate::errors::NightshiftError;
use crate::models::{AgentLog, LogLevel};
use crate::store::{AgentStore, RunHistoryStore};

fn print_log(log: &AgentLog) {
    let level = match log.level {
        LogLevel::Error => style(log.level.as_str()).red().bold(),
        LogLevel::Warning => style(log.level.as_str()).yellow(),
        LogLevel::Info => style(log.level.as_str()).green(),
        LogLevel::Debug => style(log.level.as_str()).dim(),
    };
    let run = log
        .details
        .as_ref()
        .and_then(|d| d.get("runId"))
        .and_then(|v| v.as_str())
        .map(|id| format!(" [{}]", id.chars().take(8).collect::<String>()))
        .unwrap_or_default();
    println!(
        "{} {:<7}{} {}",
        style(log.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
        level,
        run,
        log.message
    );
}

pub async fn handle_logs(args: LogsArgs, config: Option<&Path>) -> Result<(), NightshiftError> {
    let db = open_database(&load_config(config).await?)?;
    if db.get_agent(&args.agent_id)?.is_none() {
        return Err(NightshiftError::NotFound(format!("agent '{}'", args.agent_id)));
    }
    info!(agent_id = %args.agent_id, "Showing logs");

    let logs = db.list_logs(&args.agent_id, args.lines)?;
    for log in &logs {
        print_log(log);
    }

    if args.follow {
        use tokio::time::{sleep, Duration};
        let mut last_seen = logs.last().map(|l| l.timestamp);
        loop {
            sleep(Duration::from_secs(1)).await;
            let recent = db.list_logs(&args.agent_id, args.lines.max(100))?;
            for log in recent.iter().filter(|l| last_seen.map_or(true, |seen| l.timestamp > seen)) {
                print_log(log);
            }
            if let Some(last) = recent.last() {
                last_seen = Some(last.timestamp);
            }
        }
    }

    Ok(())
}
