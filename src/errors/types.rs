use thiserror::Error;

use crate::graph::GraphError;

#[derive(Debug, Error)]
pub enum NightshiftError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid action graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid schedule: {0}")]
    Schedule(String),

    #[error("Condition evaluation error: {0}")]
    ConditionEvaluation(String),

    #[error("Action timed out: {0}")]
    ActionTimeout(String),

    #[error("Action failed: {0}")]
    ActionExecution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for NightshiftError {
    fn from(e: rusqlite::Error) -> Self {
        NightshiftError::Database(e.to_string())
    }
}
