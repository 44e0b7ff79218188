pub mod agents;
pub mod connection;
pub mod runs;
pub mod schema;

pub use connection::Database;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use crate::errors::NightshiftError;
use crate::models::{
    Agent, AgentLog, AgentPatch, AgentRunResult, AgentStatus, CreateAgentParams,
};

/// Agent definitions plus the engine's bookkeeping fields.
pub trait AgentStore: Send + Sync {
    fn list_agents(&self) -> Result<Vec<Agent>, NightshiftError>;

    /// The agent with its most recent logs attached.
    fn get_agent(&self, id: &str) -> Result<Option<Agent>, NightshiftError>;

    /// Validates the definition before inserting it.
    fn create_agent(&self, params: CreateAgentParams) -> Result<Agent, NightshiftError>;

    fn update_agent(&self, id: &str, patch: AgentPatch) -> Result<Agent, NightshiftError>;

    fn delete_agent(&self, id: &str) -> Result<bool, NightshiftError>;

    fn record_agent_state(
        &self,
        id: &str,
        status: AgentStatus,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), NightshiftError>;
}

/// Append-only run and log history.
pub trait RunHistoryStore: Send + Sync {
    /// Insert or replace a run. Once the stored record is terminal it is
    /// never overwritten.
    fn record_run(&self, run: &AgentRunResult) -> Result<(), NightshiftError>;

    fn append_log(&self, agent_id: &str, log: &AgentLog) -> Result<(), NightshiftError>;

    fn latest_run(&self, agent_id: &str) -> Result<Option<AgentRunResult>, NightshiftError>;

    /// Newest first.
    fn list_runs(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentRunResult>, NightshiftError>;

    fn get_run(&self, id: &str) -> Result<Option<AgentRunResult>, NightshiftError>;

    /// The only mutation allowed on a terminal run.
    fn annotate_run(&self, id: &str, note: &str) -> Result<AgentRunResult, NightshiftError>;

    /// The last `limit` logs of an agent, oldest first.
    fn list_logs(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentLog>, NightshiftError>;
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_optional_timestamp(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(idx, &v)).transpose()
}

pub(crate) fn unknown_value(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    conversion_error(idx, NightshiftError::Database(format!("unknown {} '{}'", what, value)))
}
