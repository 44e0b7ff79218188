use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::errors::NightshiftError;
use crate::models::ActionKind;
use super::schema::CONFIG_SCHEMA;
use super::types::NightshiftConfig;

/// Largest config or agent definition file accepted.
pub const MAX_FILE_BYTES: u64 = 1_048_576;

/// Read a file subject to the size limit.
pub(crate) async fn read_limited(path: &Path) -> Result<String, NightshiftError> {
    if !tokio::fs::try_exists(path).await? {
        return Err(NightshiftError::Config(format!("File not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_FILE_BYTES {
        return Err(NightshiftError::Config(format!(
            "{} exceeds 1MB limit",
            path.display()
        )));
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

pub async fn parse_config(path: &Path) -> Result<NightshiftConfig, NightshiftError> {
    let content = read_limited(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<NightshiftConfig, NightshiftError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    // An empty document is an empty config.
    let yaml = if yaml.is_null() { serde_yaml::Value::Mapping(Default::default()) } else { yaml };

    validate_schema(&CONFIG_SCHEMA, &yaml, "Config")?;

    let config: NightshiftConfig = serde_yaml::from_value(yaml)
        .map_err(|e| NightshiftError::Config(format!("Invalid config: {}", e)))?;

    validate_semantics(&config)?;
    Ok(config)
}

/// Check a YAML document against a JSON schema. Violations are logged, not fatal;
/// the typed decode that follows is authoritative.
pub(crate) fn validate_schema(schema: &Value, yaml: &serde_yaml::Value, label: &str) -> Result<(), NightshiftError> {
    let json_value: Value = serde_json::to_value(yaml)
        .map_err(|e| NightshiftError::Config(format!("{} conversion error: {}", label, e)))?;

    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| NightshiftError::Config(format!("Schema compilation error: {}", e)))?;

    if let Err(errors) = compiled.validate(&json_value) {
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "{} schema warning", label);
        }
    }
    Ok(())
}

/// Cross-field checks the schema cannot express.
fn validate_semantics(config: &NightshiftConfig) -> Result<(), NightshiftError> {
    if config.scheduler.offset().is_none() {
        return Err(NightshiftError::Config(format!(
            "scheduler.utc_offset_minutes {} is out of range",
            config.scheduler.utc_offset_minutes
        )));
    }

    if let Some(tolerance) = config.scheduler.tolerance_secs {
        if tolerance < config.scheduler.poll_interval_secs {
            return Err(NightshiftError::Config(format!(
                "scheduler.tolerance_secs ({}) is shorter than scheduler.poll_interval_secs ({}); occurrences could fall between polls",
                tolerance, config.scheduler.poll_interval_secs
            )));
        }
    }

    if config.engine.backoff_base_ms > config.engine.backoff_max_ms {
        return Err(NightshiftError::Config(format!(
            "engine.backoff_base_ms ({}) exceeds engine.backoff_max_ms ({})",
            config.engine.backoff_base_ms, config.engine.backoff_max_ms
        )));
    }

    if config.engine.default_timeout_secs == 0 {
        return Err(NightshiftError::Config("engine.default_timeout_secs must be positive".into()));
    }

    for (kind, template) in &config.handlers {
        if matches!(ActionKind::parse(kind), ActionKind::Command | ActionKind::Script | ActionKind::Notification) {
            return Err(NightshiftError::Config(format!(
                "handlers.{} would replace a built-in handler",
                kind
            )));
        }
        if template.trim().is_empty() {
            return Err(NightshiftError::Config(format!("handlers.{} is empty", kind)));
        }
    }

    if let Some(url) = &config.notifications.webhook_url {
        reqwest::Url::parse(url).map_err(|e| {
            NightshiftError::Config(format!("notifications.webhook_url '{}' is invalid: {}", url, e))
        })?;
    }

    if config.agents.directory.is_none() {
        warn!("No agents.directory configured; agents come only from the API");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config_str(
            r#"
scheduler:
  poll_interval_secs: 5
  utc_offset_minutes: 60
engine:
  backoff_base_ms: 500
storage:
  database: /var/lib/nightshift/runs.db
agents:
  directory: /etc/nightshift/agents
handlers:
  capture: "ekos-capture --exposure {exposure} --count {count}"
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.tolerance_secs, None);
        assert_eq!(config.scheduler.tolerance(), 60);
        assert_eq!(config.engine.backoff_base_ms, 500);
        assert!(config.handlers.contains_key("capture"));
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config.scheduler.max_concurrent_runs, 4);
    }

    #[test]
    fn test_rejects_backoff_inversion() {
        let err = parse_config_str("engine:\n  backoff_base_ms: 5000\n  backoff_max_ms: 100\n").unwrap_err();
        assert!(matches!(err, NightshiftError::Config(_)));
    }

    #[test]
    fn test_rejects_tolerance_below_poll_interval() {
        let err = parse_config_str("scheduler:\n  poll_interval_secs: 120\n  tolerance_secs: 30\n").unwrap_err();
        assert!(matches!(err, NightshiftError::Config(_)));
        assert!(err.to_string().contains("tolerance_secs"));

        assert!(parse_config_str("scheduler:\n  tolerance_secs: 0\n").is_err());
        let config = parse_config_str("scheduler:\n  poll_interval_secs: 120\n").unwrap();
        assert_eq!(config.scheduler.tolerance(), 120);
    }

    #[test]
    fn test_rejects_builtin_handler_override() {
        assert!(parse_config_str("handlers:\n  command: \"rm {x}\"\n").is_err());
    }

    #[test]
    fn test_rejects_bad_offset() {
        assert!(parse_config_str("scheduler:\n  utc_offset_minutes: 5000\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_section() {
        assert!(matches!(parse_config_str("llm:\n  model: x\n"), Err(NightshiftError::Config(_))));
    }

    #[tokio::test]
    async fn test_parse_config_missing_file() {
        let err = parse_config(Path::new("/nonexistent/nightshift.yaml")).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
