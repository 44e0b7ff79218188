use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::NightshiftError;
use crate::models::{AgentPatch, CreateAgentParams};
use crate::store::AgentStore;
use super::parser::{read_limited, validate_schema};
use super::schema::AGENT_SCHEMA;

/// Parse and validate one agent definition document.
pub fn parse_agent_definition(content: &str) -> Result<CreateAgentParams, NightshiftError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    validate_schema(&AGENT_SCHEMA, &yaml, "Agent definition")?;

    let params: CreateAgentParams = serde_yaml::from_value(yaml)
        .map_err(|e| NightshiftError::Validation(format!("invalid agent definition: {}", e)))?;

    match params.id.as_deref() {
        Some(id) if !id.trim().is_empty() => {}
        _ => return Err(NightshiftError::Validation("agent definition files need a stable 'id'".into())),
    }
    if params.name.trim().is_empty() {
        return Err(NightshiftError::Validation("agent name must not be empty".into()));
    }
    params.config.validate()?;
    Ok(params)
}

pub async fn load_agent_file(path: &Path) -> Result<CreateAgentParams, NightshiftError> {
    let content = read_limited(path).await?;
    parse_agent_definition(&content).map_err(|e| match e {
        NightshiftError::Validation(msg) => NightshiftError::Validation(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// `*.yaml` and `*.yml` files directly under `dir`, sorted.
pub fn agent_files(dir: &Path) -> Result<Vec<PathBuf>, NightshiftError> {
    let mut files = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| NightshiftError::Config(format!("bad agents directory '{}': {}", dir.display(), e)))?;
        for entry in entries {
            match entry {
                Ok(path) => files.push(path),
                Err(e) => warn!(error = %e, "Unreadable agent definition path"),
            }
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Upsert every definition in `dir` into the store by id. A bad file is
/// reported and skipped; the rest still load.
pub async fn sync_agent_directory(store: &dyn AgentStore, dir: &Path) -> Result<SyncReport, NightshiftError> {
    if !tokio::fs::try_exists(dir).await? {
        return Err(NightshiftError::Config(format!("agents directory not found: {}", dir.display())));
    }

    let mut report = SyncReport::default();
    for path in agent_files(dir)? {
        let params = match load_agent_file(&path).await {
            Ok(params) => params,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping agent definition");
                report.failed.push((path, e.to_string()));
                continue;
            }
        };

        let id = params.id.clone().unwrap_or_default();
        let outcome = match store.get_agent(&id)? {
            Some(_) => store
                .update_agent(
                    &id,
                    AgentPatch {
                        name: Some(params.name),
                        description: Some(params.description),
                        status: None,
                        category: Some(params.category),
                        config: Some(params.config),
                    },
                )
                .map(|_| false),
            None => store.create_agent(params).map(|_| true),
        };
        match outcome {
            Ok(true) => report.created += 1,
            Ok(false) => report.updated += 1,
            Err(e) => {
                warn!(path = %path.display(), agent_id = %id, error = %e, "Failed to store agent definition");
                report.failed.push((path, e.to_string()));
                continue;
            }
        }
        debug!(path = %path.display(), agent_id = %id, "Agent definition loaded");
    }

    info!(
        created = report.created,
        updated = report.updated,
        failed = report.failed.len(),
        "Agent definitions synced"
    );
    Ok(report)
}
