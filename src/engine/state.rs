use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::NightshiftError;
use crate::graph::ExecutionPlan;
use crate::models::{
    ActionRunRecord, ActionRunStatus, AgentLog, AgentRunResult, RunStatus,
};
use crate::store::RunHistoryStore;

/// Run status from the final action records.
///
/// `cancelled` wins; otherwise any failed action, or a skipped action that
/// nothing depends on, fails the run.
pub fn aggregate_status(plan: &ExecutionPlan, actions: &[ActionRunRecord], cancelled: bool) -> RunStatus {
    if cancelled {
        return RunStatus::Cancelled;
    }
    let failed = actions.iter().any(|a| a.status == ActionRunStatus::Failed);
    let terminal_skipped = actions
        .iter()
        .enumerate()
        .any(|(idx, a)| a.status == ActionRunStatus::Skipped && plan.is_terminal(idx));
    if failed || terminal_skipped {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    }
}

/// The in-flight run record. Every mutation goes through here so the store
/// sees logs in transition order.
pub struct RunTracker {
    agent_id: String,
    run: Mutex<AgentRunResult>,
    history: Arc<dyn RunHistoryStore>,
}

impl RunTracker {
    /// Record the new run in the store. Fails if the run cannot be recorded.
    pub async fn start(
        run: AgentRunResult,
        history: Arc<dyn RunHistoryStore>,
    ) -> Result<Self, NightshiftError> {
        history.record_run(&run)?;
        Ok(Self {
            agent_id: run.agent_id.clone(),
            run: Mutex::new(run),
            history,
        })
    }

    fn details(run: &AgentRunResult, action_id: Option<&str>) -> serde_json::Value {
        match action_id {
            Some(action_id) => json!({"runId": run.id, "actionId": action_id}),
            None => json!({"runId": run.id}),
        }
    }

    fn append(&self, run: &AgentRunResult, log: AgentLog) {
        if let Err(e) = self.history.append_log(&self.agent_id, &log) {
            warn!(agent_id = %self.agent_id, run_id = %run.id, error = %e, "Failed to append run log");
        }
    }

    /// Append a run-scoped log.
    pub async fn log(&self, log: AgentLog, action_id: Option<&str>) {
        let run = self.run.lock().await;
        let log = log.with_details(Self::details(&run, action_id));
        self.append(&run, log);
    }

    /// Move action `idx` to `next`, apply `update`, log `message` and persist a snapshot.
    pub async fn transition(
        &self,
        idx: usize,
        next: ActionRunStatus,
        log: AgentLog,
        update: impl FnOnce(&mut ActionRunRecord),
    ) -> Result<(), NightshiftError> {
        let mut run = self.run.lock().await;
        let record = run
            .actions
            .get_mut(idx)
            .ok_or_else(|| NightshiftError::Internal(format!("no action at index {}", idx)))?;
        if !record.status.can_transition_to(next) {
            return Err(NightshiftError::Internal(format!(
                "illegal transition {} -> {} for action '{}'",
                record.status, next, record.action_id
            )));
        }

        record.status = next;
        let now = Utc::now();
        match next {
            ActionRunStatus::Running => record.start_time = Some(now),
            _ => record.end_time = Some(now),
        }
        update(record);
        let action_id = record.action_id.clone();

        let log = log.with_details(Self::details(&run, Some(&action_id)));
        self.append(&run, log);
        if let Err(e) = self.history.record_run(&run) {
            warn!(agent_id = %self.agent_id, run_id = %run.id, error = %e, "Failed to persist run snapshot");
        }
        Ok(())
    }

    pub async fn set_attempts(&self, idx: usize, attempts: u32) {
        if let Some(record) = self.run.lock().await.actions.get_mut(idx) {
            record.attempts = attempts;
        }
    }

    pub async fn action_status(&self, idx: usize) -> Option<ActionRunStatus> {
        self.run.lock().await.actions.get(idx).map(|a| a.status)
    }

    pub async fn snapshot(&self) -> AgentRunResult {
        self.run.lock().await.clone()
    }

    /// Seal the run with its terminal status. The final record must reach the store.
    pub async fn finish(
        &self,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
        log: AgentLog,
    ) -> Result<AgentRunResult, NightshiftError> {
        let mut run = self.run.lock().await;
        run.status = status;
        run.end_time = Some(Utc::now());
        run.output = output;
        run.error = error;

        let log = log.with_details(json!({
            "runId": run.id,
            "status": status.as_str(),
            "durationMs": run.duration_ms(),
        }));
        self.append(&run, log);
        self.history.record_run(&run)?;
        Ok(run.clone())
    }
}
