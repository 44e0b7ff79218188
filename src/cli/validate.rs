use console::style;

use crate::cli::commands::ValidateArgs;
use crate::config::{load_agent_file, parse_config};
use crate::errors::NightshiftError;
use crate::triggers::schedule::describe;

/// Agent definitions carry a top-level `name`; config files never do.
async fn looks_like_agent(path: &std::path::Path) -> Result<bool, NightshiftError> {
    let content = tokio::fs::read_to_string(path).await?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)?;
    Ok(yaml.get("name").is_some())
}

pub async fn handle_validate(args: ValidateArgs) -> Result<(), NightshiftError> {
    if !tokio::fs::try_exists(&args.file).await? {
        return Err(NightshiftError::Config(format!("File not found: {}", args.file.display())));
    }

    if looks_like_agent(&args.file).await? {
        let agent = load_agent_file(&args.file).await?;
        println!(
            "{} agent definition is valid: {}",
            style("\u{2714}").green().bold(),
            args.file.display()
        );
        println!("  id:       {}", agent.id.as_deref().unwrap_or("-"));
        println!("  actions:  {}", agent.config.actions.len());
        println!("  schedule: {}", agent.config.schedule.as_ref().map(describe).unwrap_or_else(|| "none".into()));
        let events = agent.config.triggers.event_names();
        if !events.is_empty() {
            println!("  events:   {}", events.join(", "));
        }
    } else {
        let config = parse_config(&args.file).await?;
        println!(
            "{} configuration is valid: {}",
            style("\u{2714}").green().bold(),
            args.file.display()
        );
        println!("  database: {}", config.storage.database.display());
        if !config.handlers.is_empty() {
            println!("  handlers: {}", config.handlers.keys().cloned().collect::<Vec<_>>().join(", "));
        }
    }
    Ok(())
}
