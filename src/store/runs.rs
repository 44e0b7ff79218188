use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use crate::errors::NightshiftError;
use crate::models::{
    ActionRunRecord, ActionRunStatus, AgentLog, AgentRunResult, AgentStatus, LogLevel, RunStatus,
};
use super::{
    conversion_error, parse_optional_timestamp, parse_timestamp, unknown_value, Database,
    RunHistoryStore,
};

const RUN_COLUMNS: &str =
    "id, agent_id, start_time, end_time, status, actions_json, output, error, annotations_json";

fn run_from_row(row: &rusqlite::Row) -> rusqlite::Result<AgentRunResult> {
    let status: String = row.get(4)?;
    let actions_json: String = row.get(5)?;
    let annotations_json: String = row.get(8)?;
    Ok(AgentRunResult {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        start_time: parse_timestamp(2, &row.get::<_, String>(2)?)?,
        end_time: parse_optional_timestamp(3, row.get(3)?)?,
        status: RunStatus::parse(&status).ok_or_else(|| unknown_value(4, "run status", &status))?,
        actions: serde_json::from_str::<Vec<ActionRunRecord>>(&actions_json)
            .map_err(|e| conversion_error(5, e))?,
        output: row.get(6)?,
        error: row.get(7)?,
        annotations: serde_json::from_str::<Vec<String>>(&annotations_json)
            .map_err(|e| conversion_error(8, e))?,
    })
}

fn select_run(conn: &Connection, id: &str) -> Result<Option<AgentRunResult>, NightshiftError> {
    conn.query_row(
        &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
        rusqlite::params![id],
        run_from_row,
    )
    .optional()
    .map_err(|e| NightshiftError::Database(format!("Query error: {}", e)))
}

fn log_from_row(row: &rusqlite::Row) -> rusqlite::Result<AgentLog> {
    let level: String = row.get(1)?;
    let details: Option<String> = row.get(3)?;
    Ok(AgentLog {
        timestamp: parse_timestamp(0, &row.get::<_, String>(0)?)?,
        level: LogLevel::parse(&level).ok_or_else(|| unknown_value(1, "log level", &level))?,
        message: row.get(2)?,
        details: details
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| conversion_error(3, e))?,
    })
}

/// The last `limit` logs of an agent in append order.
pub(crate) fn query_logs(
    conn: &Connection,
    agent_id: &str,
    limit: usize,
) -> Result<Vec<AgentLog>, NightshiftError> {
    let mut stmt = conn
        .prepare(
            "SELECT timestamp, level, message, details_json FROM (
                SELECT seq, timestamp, level, message, details_json FROM agent_logs
                WHERE agent_id = ?1 ORDER BY seq DESC LIMIT ?2
            ) ORDER BY seq ASC",
        )
        .map_err(|e| NightshiftError::Database(format!("Query failed: {}", e)))?;

    let rows = stmt
        .query_map(rusqlite::params![agent_id, limit as i64], log_from_row)
        .map_err(|e| NightshiftError::Database(format!("Query error: {}", e)))?;

    let mut logs = Vec::new();
    for row in rows {
        logs.push(row.map_err(|e| NightshiftError::Database(format!("Row error: {}", e)))?);
    }
    Ok(logs)
}

impl RunHistoryStore for Database {
    fn record_run(&self, run: &AgentRunResult) -> Result<(), NightshiftError> {
        let conn = self.lock()?;
        if let Some(existing) = select_run(&conn, &run.id)? {
            if existing.is_terminal() {
                return Err(NightshiftError::Internal(format!(
                    "run '{}' is already {}, refusing to overwrite",
                    run.id, existing.status
                )));
            }
        }

        conn.execute(
            &format!(
                "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '[]')
                 ON CONFLICT(id) DO UPDATE SET end_time = excluded.end_time, status = excluded.status,
                 actions_json = excluded.actions_json, output = excluded.output, error = excluded.error",
                RUN_COLUMNS
            ),
            rusqlite::params![
                run.id,
                run.agent_id,
                run.start_time.to_rfc3339(),
                run.end_time.map(|t| t.to_rfc3339()),
                run.status.as_str(),
                serde_json::to_string(&run.actions)?,
                run.output,
                run.error,
            ],
        ).map_err(|e| NightshiftError::Database(format!("Failed to record run: {}", e)))?;
        Ok(())
    }

    fn append_log(&self, agent_id: &str, log: &AgentLog) -> Result<(), NightshiftError> {
        let details = log.details.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_logs (agent_id, timestamp, level, message, details_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                agent_id,
                log.timestamp.to_rfc3339(),
                log.level.as_str(),
                log.message,
                details,
            ],
        ).map_err(|e| NightshiftError::Database(format!("Failed to append log: {}", e)))?;
        Ok(())
    }

    fn latest_run(&self, agent_id: &str) -> Result<Option<AgentRunResult>, NightshiftError> {
        Ok(self.list_runs(agent_id, 1)?.into_iter().next())
    }

    fn list_runs(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentRunResult>, NightshiftError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM runs WHERE agent_id = ?1 ORDER BY start_time DESC, rowid DESC LIMIT ?2",
                RUN_COLUMNS
            ))
            .map_err(|e| NightshiftError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(rusqlite::params![agent_id, limit as i64], run_from_row)
            .map_err(|e| NightshiftError::Database(format!("Query error: {}", e)))?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(|e| NightshiftError::Database(format!("Row error: {}", e)))?);
        }
        Ok(runs)
    }

    fn get_run(&self, id: &str) -> Result<Option<AgentRunResult>, NightshiftError> {
        let conn = self.lock()?;
        select_run(&conn, id)
    }

    fn annotate_run(&self, id: &str, note: &str) -> Result<AgentRunResult, NightshiftError> {
        if note.trim().is_empty() {
            return Err(NightshiftError::Validation("annotation must not be empty".into()));
        }

        let conn = self.lock()?;
        let mut run = select_run(&conn, id)?
            .ok_or_else(|| NightshiftError::NotFound(format!("run '{}'", id)))?;
        if !run.is_terminal() {
            return Err(NightshiftError::Validation(format!(
                "run '{}' is still running and cannot be annotated",
                id
            )));
        }

        run.annotations.push(note.to_string());
        conn.execute(
            "UPDATE runs SET annotations_json = ?2 WHERE id = ?1",
            rusqlite::params![id, serde_json::to_string(&run.annotations)?],
        ).map_err(|e| NightshiftError::Database(format!("Update failed: {}", e)))?;
        Ok(run)
    }

    fn list_logs(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentLog>, NightshiftError> {
        let conn = self.lock()?;
        query_logs(&conn, agent_id, limit)
    }
}

pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

impl Database {
    /// Close out runs left `running` by a previous process that died mid-run.
    ///
    /// Each such run becomes `failed`: running actions fail, pending ones are
    /// skipped, and the owning agent moves to `error` with an error log.
    /// Agents still marked `running` without an open run go back to `idle`.
    /// Only call this before any run of this process has started.
    pub fn recover_interrupted_runs(&self) -> Result<Vec<AgentRunResult>, NightshiftError> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| NightshiftError::Database(format!("Failed to begin transaction: {}", e)))?;

        let orphaned = {
            let mut stmt = tx
                .prepare(&format!("SELECT {} FROM runs WHERE status = 'running' ORDER BY start_time", RUN_COLUMNS))
                .map_err(|e| NightshiftError::Database(format!("Query failed: {}", e)))?;
            let rows = stmt
                .query_map([], run_from_row)
                .map_err(|e| NightshiftError::Database(format!("Query error: {}", e)))?;
            let mut runs = Vec::new();
            for row in rows {
                runs.push(row.map_err(|e| NightshiftError::Database(format!("Row error: {}", e)))?);
            }
            runs
        };

        let now = Utc::now();
        let mut recovered = Vec::with_capacity(orphaned.len());
        for mut run in orphaned {
            for action in &mut run.actions {
                match action.status {
                    ActionRunStatus::Pending => action.status = ActionRunStatus::Skipped,
                    ActionRunStatus::Running => {
                        action.status = ActionRunStatus::Failed;
                        action.end_time = Some(now);
                        action.error = Some(INTERRUPTED_BY_RESTART.to_string());
                    }
                    _ => {}
                }
            }
            run.status = RunStatus::Failed;
            run.end_time = Some(now);
            run.error = Some(INTERRUPTED_BY_RESTART.to_string());

            tx.execute(
                "UPDATE runs SET status = ?2, end_time = ?3, actions_json = ?4, error = ?5 WHERE id = ?1",
                rusqlite::params![
                    run.id,
                    run.status.as_str(),
                    now.to_rfc3339(),
                    serde_json::to_string(&run.actions)?,
                    run.error,
                ],
            )
            .map_err(|e| NightshiftError::Database(format!("Failed to close run: {}", e)))?;

            let log = AgentLog::error(format!("Run {} {}", run.id, INTERRUPTED_BY_RESTART));
            tx.execute(
                "INSERT INTO agent_logs (agent_id, timestamp, level, message, details_json) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    run.agent_id,
                    log.timestamp.to_rfc3339(),
                    log.level.as_str(),
                    log.message,
                    serde_json::to_string(&serde_json::json!({"runId": run.id}))?,
                ],
            )
            .map_err(|e| NightshiftError::Database(format!("Failed to append log: {}", e)))?;

            tx.execute(
                "UPDATE agents SET status = ?2 WHERE id = ?1 AND status != 'paused'",
                rusqlite::params![run.agent_id, AgentStatus::Error.as_str()],
            )
            .map_err(|e| NightshiftError::Database(format!("Update failed: {}", e)))?;

            warn!(agent_id = %run.agent_id, run_id = %run.id, "Closed run interrupted by restart");
            recovered.push(run);
        }

        tx.execute(
            "UPDATE agents SET status = ?1 WHERE status = ?2",
            rusqlite::params![AgentStatus::Idle.as_str(), AgentStatus::Running.as_str()],
        )
        .map_err(|e| NightshiftError::Database(format!("Update failed: {}", e)))?;

        tx.commit()
            .map_err(|e| NightshiftError::Database(format!("Failed to commit recovery: {}", e)))?;
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::{AgentCategory, AgentConfig, CreateAgentParams};
    use crate::store::AgentStore;
    use serde_json::json;

    fn setup() -> (Database, String) {
        let db = Database::in_memory().unwrap();
        let agent = db.create_agent(CreateAgentParams {
            id: Some("imaging".into()),
            name: "Imaging".into(),
            description: String::new(),
            category: AgentCategory::Imaging,
            config: AgentConfig::default(),
        }).unwrap();
        (db, agent.id)
    }

    fn run(id: &str, agent_id: &str, status: RunStatus) -> AgentRunResult {
        AgentRunResult {
            id: id.to_string(),
            agent_id: agent_id.to_string(),
            start_time: Utc::now(),
            end_time: status.is_terminal().then(Utc::now),
            status,
            actions: vec![ActionRunRecord::pending("focus", "Autofocus")],
            output: None,
            error: None,
            annotations: Vec::new(),
        }
    }

    #[test]
    fn test_record_and_get_run() {
        let (db, agent_id) = setup();
        db.record_run(&run("r1", &agent_id, RunStatus::Running)).unwrap();

        let stored = db.get_run("r1").unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert_eq!(stored.actions[0].status, ActionRunStatus::Pending);
        assert!(db.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_record_run_upserts_while_running() {
        let (db, agent_id) = setup();
        let mut r = run("r1", &agent_id, RunStatus::Running);
        db.record_run(&r).unwrap();

        r.status = RunStatus::Completed;
        r.end_time = Some(Utc::now());
        r.actions[0].status = ActionRunStatus::Skipped;
        db.record_run(&r).unwrap();

        let stored = db.get_run("r1").unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.actions[0].status, ActionRunStatus::Skipped);
    }

    #[test]
    fn test_terminal_run_not_overwritten() {
        let (db, agent_id) = setup();
        let mut r = run("r1", &agent_id, RunStatus::Failed);
        db.record_run(&r).unwrap();

        r.status = RunStatus::Completed;
        assert!(db.record_run(&r).is_err());
        assert_eq!(db.get_run("r1").unwrap().unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_annotate_terminal_run() {
        let (db, agent_id) = setup();
        db.record_run(&run("r1", &agent_id, RunStatus::Completed)).unwrap();

        db.annotate_run("r1", "clouds rolled in after frame 12").unwrap();
        let annotated = db.annotate_run("r1", "re-run tomorrow").unwrap();
        assert_eq!(annotated.annotations.len(), 2);
        assert_eq!(db.get_run("r1").unwrap().unwrap().annotations[1], "re-run tomorrow");
    }

    #[test]
    fn test_annotate_running_run_rejected() {
        let (db, agent_id) = setup();
        db.record_run(&run("r1", &agent_id, RunStatus::Running)).unwrap();
        assert!(db.annotate_run("r1", "note").unwrap_err().is_validation());
        assert!(matches!(db.annotate_run("nope", "note"), Err(NightshiftError::NotFound(_))));
    }

    #[test]
    fn test_list_runs_newest_first() {
        let (db, agent_id) = setup();
        let mut older = run("old", &agent_id, RunStatus::Completed);
        older.start_time = Utc::now() - Duration::hours(2);
        db.record_run(&older).unwrap();
        db.record_run(&run("new", &agent_id, RunStatus::Failed)).unwrap();

        let runs = db.list_runs(&agent_id, 10).unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(db.latest_run(&agent_id).unwrap().unwrap().id, "new");
        assert_eq!(db.list_runs(&agent_id, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_logs_keep_append_order_and_details() {
        let (db, agent_id) = setup();
        for i in 0..5 {
            let log = AgentLog::info(format!("step {}", i)).with_details(json!({"runId": "r1", "i": i}));
            db.append_log(&agent_id, &log).unwrap();
        }

        let tail = db.list_logs(&agent_id, 3).unwrap();
        let messages: Vec<&str> = tail.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["step 2", "step 3", "step 4"]);
        assert_eq!(tail[0].details.as_ref().unwrap()["runId"], "r1");
    }

    #[test]
    fn test_recover_interrupted_runs_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightshift.db");
        let path = path.to_string_lossy();
        {
            let db = Database::new(&path).unwrap();
            db.create_agent(CreateAgentParams {
                id: Some("a".into()),
                name: "A".into(),
                description: String::new(),
                category: AgentCategory::Custom,
                config: AgentConfig::default(),
            }).unwrap();
            db.record_agent_state("a", AgentStatus::Running, Some(Utc::now()), None).unwrap();

            let mut r1 = run("r1", "a", RunStatus::Running);
            r1.actions = vec![
                ActionRunRecord { status: ActionRunStatus::Completed, ..ActionRunRecord::pending("cool", "Cool") },
                ActionRunRecord { status: ActionRunStatus::Running, ..ActionRunRecord::pending("flats", "Flats") },
                ActionRunRecord::pending("park", "Park"),
            ];
            db.record_run(&r1).unwrap();
            db.record_run(&run("r0", "a", RunStatus::Completed)).unwrap();
        }

        let db = Database::new(&path).unwrap();
        let recovered = db.recover_interrupted_runs().unwrap();
        assert_eq!(recovered.len(), 1);

        let r1 = db.get_run("r1").unwrap().unwrap();
        assert_eq!(r1.status, RunStatus::Failed);
        assert!(r1.end_time.is_some());
        assert_eq!(r1.error.as_deref(), Some(INTERRUPTED_BY_RESTART));
        let statuses: Vec<ActionRunStatus> = r1.actions.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![ActionRunStatus::Completed, ActionRunStatus::Failed, ActionRunStatus::Skipped]
        );
        assert_eq!(db.get_run("r0").unwrap().unwrap().status, RunStatus::Completed);

        assert_eq!(db.get_agent("a").unwrap().unwrap().status, AgentStatus::Error);
        let logs = db.list_logs("a", 10).unwrap();
        assert!(logs.iter().any(|l| l.level == LogLevel::Error && l.message.contains("interrupted by restart")));
        assert!(db.annotate_run("r1", "dome lost power").is_ok());

        // Nothing left to close on the next start.
        assert!(db.recover_interrupted_runs().unwrap().is_empty());
    }

    #[test]
    fn test_recover_resets_running_agent_without_open_run() {
        let (db, agent_id) = setup();
        db.record_agent_state(&agent_id, AgentStatus::Running, None, None).unwrap();
        assert!(db.recover_interrupted_runs().unwrap().is_empty());
        assert_eq!(db.get_agent(&agent_id).unwrap().unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn test_recover_keeps_pause() {
        let (db, agent_id) = setup();
        db.record_run(&run("r1", &agent_id, RunStatus::Running)).unwrap();
        db.record_agent_state(&agent_id, AgentStatus::Paused, None, None).unwrap();
        db.recover_interrupted_runs().unwrap();
        assert_eq!(db.get_agent(&agent_id).unwrap().unwrap().status, AgentStatus::Paused);
        assert_eq!(db.get_run("r1").unwrap().unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_run_for_unknown_agent_rejected() {
        let (db, _) = setup();
        assert!(db.record_run(&run("r1", "ghost", RunStatus::Running)).is_err());
    }
}
