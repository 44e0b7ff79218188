use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::errors::NightshiftError;
use crate::models::{
    Agent, AgentCategory, AgentConfig, AgentPatch, AgentStatus, CreateAgentParams,
};
use super::runs::query_logs;
use super::{
    conversion_error, parse_optional_timestamp, parse_timestamp, unknown_value, AgentStore,
    Database,
};

/// Logs attached to an agent returned by `get_agent`.
const AGENT_LOG_TAIL: usize = 100;

const AGENT_COLUMNS: &str =
    "id, name, description, status, type, last_run, next_run, config_json, created_at, updated_at";

fn agent_from_row(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    let status: String = row.get(3)?;
    let category: String = row.get(4)?;
    let config_json: String = row.get(7)?;
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        status: AgentStatus::parse(&status).ok_or_else(|| unknown_value(3, "agent status", &status))?,
        category: AgentCategory::parse(&category).ok_or_else(|| unknown_value(4, "agent type", &category))?,
        last_run: parse_optional_timestamp(5, row.get(5)?)?,
        next_run: parse_optional_timestamp(6, row.get(6)?)?,
        config: serde_json::from_str::<AgentConfig>(&config_json).map_err(|e| conversion_error(7, e))?,
        created_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
        updated_at: parse_timestamp(9, &row.get::<_, String>(9)?)?,
        logs: Vec::new(),
    })
}

fn select_agent(conn: &Connection, id: &str) -> Result<Option<Agent>, NightshiftError> {
    conn.query_row(
        &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
        rusqlite::params![id],
        agent_from_row,
    )
    .optional()
    .map_err(|e| NightshiftError::Database(format!("Query error: {}", e)))
}

fn write_definition(conn: &Connection, agent: &Agent) -> Result<(), NightshiftError> {
    let config_json = serde_json::to_string(&agent.config)?;
    conn.execute(
        "UPDATE agents SET name = ?2, description = ?3, status = ?4, type = ?5, config_json = ?6, updated_at = ?7 WHERE id = ?1",
        rusqlite::params![
            agent.id,
            agent.name,
            agent.description,
            agent.status.as_str(),
            agent.category.as_str(),
            config_json,
            agent.updated_at.to_rfc3339(),
        ],
    ).map_err(|e| NightshiftError::Database(format!("Update failed: {}", e)))?;
    Ok(())
}

fn validate_name(name: &str) -> Result<(), NightshiftError> {
    if name.trim().is_empty() {
        return Err(NightshiftError::Validation("agent name must not be empty".into()));
    }
    Ok(())
}

impl AgentStore for Database {
    fn list_agents(&self) -> Result<Vec<Agent>, NightshiftError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM agents ORDER BY created_at, id", AGENT_COLUMNS))
            .map_err(|e| NightshiftError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map([], agent_from_row)
            .map_err(|e| NightshiftError::Database(format!("Query error: {}", e)))?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(row.map_err(|e| NightshiftError::Database(format!("Row error: {}", e)))?);
        }
        Ok(agents)
    }

    fn get_agent(&self, id: &str) -> Result<Option<Agent>, NightshiftError> {
        let conn = self.lock()?;
        let Some(mut agent) = select_agent(&conn, id)? else {
            return Ok(None);
        };
        agent.logs = query_logs(&conn, id, AGENT_LOG_TAIL)?;
        Ok(Some(agent))
    }

    fn create_agent(&self, params: CreateAgentParams) -> Result<Agent, NightshiftError> {
        validate_name(&params.name)?;
        params.config.validate()?;

        let now = Utc::now();
        let agent = Agent {
            id: params.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: params.name,
            description: params.description,
            status: AgentStatus::Idle,
            category: params.category,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
            config: params.config,
            logs: Vec::new(),
        };

        let conn = self.lock()?;
        if select_agent(&conn, &agent.id)?.is_some() {
            return Err(NightshiftError::Validation(format!("agent '{}' already exists", agent.id)));
        }
        conn.execute(
            &format!("INSERT INTO agents ({}) VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6, ?7, ?8)", AGENT_COLUMNS),
            rusqlite::params![
                agent.id,
                agent.name,
                agent.description,
                agent.status.as_str(),
                agent.category.as_str(),
                serde_json::to_string(&agent.config)?,
                agent.created_at.to_rfc3339(),
                agent.updated_at.to_rfc3339(),
            ],
        ).map_err(|e| NightshiftError::Database(format!("Failed to create agent: {}", e)))?;

        debug!(agent_id = %agent.id, "Agent created");
        Ok(agent)
    }

    fn update_agent(&self, id: &str, patch: AgentPatch) -> Result<Agent, NightshiftError> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(config) = &patch.config {
            config.validate()?;
        }

        let conn = self.lock()?;
        let mut agent = select_agent(&conn, id)?
            .ok_or_else(|| NightshiftError::NotFound(format!("agent '{}'", id)))?;
        patch.apply(&mut agent);
        write_definition(&conn, &agent)?;
        Ok(agent)
    }

    fn delete_agent(&self, id: &str) -> Result<bool, NightshiftError> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM agents WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| NightshiftError::Database(format!("Delete failed: {}", e)))?;
        Ok(affected > 0)
    }

    fn record_agent_state(
        &self,
        id: &str,
        status: AgentStatus,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), NightshiftError> {
        let conn = self.lock()?;
        // An explicit pause issued while a run was in flight wins over run bookkeeping.
        let affected = conn.execute(
            "UPDATE agents SET status = CASE WHEN status = 'paused' THEN 'paused' ELSE ?2 END, last_run = ?3, next_run = ?4 WHERE id = ?1",
            rusqlite::params![
                id,
                status.as_str(),
                last_run.map(|t| t.to_rfc3339()),
                next_run.map(|t| t.to_rfc3339()),
            ],
        ).map_err(|e| NightshiftError::Database(format!("Update failed: {}", e)))?;

        if affected == 0 {
            return Err(NightshiftError::NotFound(format!("agent '{}'", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentLog, Schedule};
    use crate::store::RunHistoryStore;
    use serde_json::json;

    fn params(name: &str) -> CreateAgentParams {
        CreateAgentParams {
            id: None,
            name: name.to_string(),
            description: "test agent".to_string(),
            category: AgentCategory::Imaging,
            config: AgentConfig::default(),
        }
    }

    #[test]
    fn test_create_and_get_agent() {
        let db = Database::in_memory().unwrap();
        let created = db.create_agent(params("Flats")).unwrap();
        assert_eq!(created.status, AgentStatus::Idle);

        let fetched = db.get_agent(&created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Flats");
        assert_eq!(fetched.category, AgentCategory::Imaging);
        assert!(fetched.last_run.is_none());
    }

    #[test]
    fn test_create_with_stable_id() {
        let db = Database::in_memory().unwrap();
        let mut p = params("Darks");
        p.id = Some("darks".into());
        db.create_agent(p.clone()).unwrap();
        assert!(db.get_agent("darks").unwrap().is_some());

        let err = db.create_agent(p).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_create_rejects_cyclic_actions() {
        let db = Database::in_memory().unwrap();
        let mut p = params("Broken");
        p.config = serde_json::from_value(json!({
            "actions": [
                {"id": "a", "type": "command", "name": "A", "parameters": {"command": "true"}, "dependsOn": ["b"]},
                {"id": "b", "type": "command", "name": "B", "parameters": {"command": "true"}, "dependsOn": ["a"]}
            ]
        })).unwrap();
        let err = db.create_agent(p).unwrap_err();
        assert!(matches!(err, NightshiftError::Graph(_)));
        assert!(db.list_agents().unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let db = Database::in_memory().unwrap();
        assert!(db.create_agent(params("  ")).unwrap_err().is_validation());
    }

    #[test]
    fn test_update_agent_applies_patch() {
        let db = Database::in_memory().unwrap();
        let created = db.create_agent(params("Lights")).unwrap();

        let patch = AgentPatch {
            description: Some("updated".into()),
            config: Some(serde_json::from_value(json!({"schedule": {"type": "daily", "time": "21:00"}})).unwrap()),
            ..Default::default()
        };
        let updated = db.update_agent(&created.id, patch).unwrap();
        assert_eq!(updated.description, "updated");
        assert!(matches!(updated.config.schedule, Some(Schedule::Daily { .. })));

        let fetched = db.get_agent(&created.id).unwrap().unwrap();
        assert_eq!(fetched.config, updated.config);
        assert!(fetched.updated_at >= created.updated_at);
    }

    #[test]
    fn test_update_missing_agent() {
        let db = Database::in_memory().unwrap();
        let err = db.update_agent("ghost", AgentPatch::default()).unwrap_err();
        assert!(matches!(err, NightshiftError::NotFound(_)));
    }

    #[test]
    fn test_delete_agent_cascades_logs() {
        let db = Database::in_memory().unwrap();
        let created = db.create_agent(params("Temp")).unwrap();
        db.append_log(&created.id, &AgentLog::info("hello")).unwrap();

        assert!(db.delete_agent(&created.id).unwrap());
        assert!(db.get_agent(&created.id).unwrap().is_none());
        assert!(db.list_logs(&created.id, 10).unwrap().is_empty());
        assert!(!db.delete_agent(&created.id).unwrap());
    }

    #[test]
    fn test_record_agent_state_keeps_pause() {
        let db = Database::in_memory().unwrap();
        let created = db.create_agent(params("Guide")).unwrap();
        let now = Utc::now();

        db.record_agent_state(&created.id, AgentStatus::Running, Some(now), None).unwrap();
        let agent = db.get_agent(&created.id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
        assert_eq!(agent.last_run.map(|t| t.timestamp()), Some(now.timestamp()));

        db.update_agent(&created.id, AgentPatch { status: Some(AgentStatus::Paused), ..Default::default() }).unwrap();
        db.record_agent_state(&created.id, AgentStatus::Idle, Some(now), None).unwrap();
        assert_eq!(db.get_agent(&created.id).unwrap().unwrap().status, AgentStatus::Paused);
    }

    #[test]
    fn test_get_agent_attaches_logs() {
        let db = Database::in_memory().unwrap();
        let created = db.create_agent(params("Logger")).unwrap();
        db.append_log(&created.id, &AgentLog::info("first")).unwrap();
        db.append_log(&created.id, &AgentLog::warning("second")).unwrap();

        let agent = db.get_agent(&created.id).unwrap().unwrap();
        let messages: Vec<&str> = agent.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
