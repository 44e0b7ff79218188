use std::path::Path;

use console::style;

use crate::cli::commands::TriggerArgs;
use crate::cli::history::{format_duration, styled_status};
use crate::cli::runtime::Runtime;
use crate::errors::NightshiftError;
use crate::models::RunStatus;
use crate::scheduler::Submission;

/// Runs the agent in this process; use the API's `/run` when a daemon owns the agents.
pub async fn handle_trigger(args: TriggerArgs, config: Option<&Path>) -> Result<(), NightshiftError> {
    let runtime = Runtime::build(config).await?;

    let handle = match runtime.scheduler.trigger_now(&args.agent_id).await? {
        Submission::Started(handle) => handle,
        Submission::GateClosed => {
            return Err(NightshiftError::Validation(format!(
                "conditions for agent '{}' are not met; see `nightshift logs {}`",
                args.agent_id, args.agent_id
            )))
        }
        Submission::Paused => {
            return Err(NightshiftError::Validation(format!("agent '{}' is paused", args.agent_id)))
        }
        Submission::AlreadyRunning { .. } => {
            return Err(NightshiftError::Validation(format!("agent '{}' is already running", args.agent_id)))
        }
    };

    let cancel_scheduler = runtime.scheduler.clone();
    let agent_id = args.agent_id.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_scheduler.cancel(&agent_id);
        }
    });
    let run = handle.wait().await;
    interrupt.abort();
    let run = run?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        println!(
            "Run {} {} in {}",
            style(&run.id).dim(),
            styled_status(run.status),
            format_duration(run.duration_ms())
        );
        for action in &run.actions {
            let detail = action.error.as_deref().or(action.output.as_deref()).unwrap_or("");
            println!("  {:<20} {:<10} {}", action.action_id, action.status.as_str(), detail);
        }
    }

    match run.status {
        RunStatus::Failed => Err(NightshiftError::ActionExecution(
            run.error.unwrap_or_else(|| "run failed".into()),
        )),
        _ => Ok(()),
    }
}
