use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conditions::{evaluate_gate, GateResult};
use crate::errors::{BackoffPolicy, NightshiftError};
use crate::facts::FactSnapshot;
use crate::graph::ExecutionPlan;
use crate::models::{
    ActionRunRecord, ActionRunStatus, Agent, AgentLog, AgentRunResult, NotificationEvent, RunStatus,
};
use crate::notify::{Notification, Notifier};
use crate::store::RunHistoryStore;
use super::dispatch::{ActionContext, HandlerRegistry};
use super::state::{aggregate_status, RunTracker};

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Per-attempt bound for actions without their own `timeout`.
    pub default_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// How long an in-flight attempt may keep running after cancellation.
    pub cancel_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

enum AttemptOutcome {
    Finished(Result<String, NightshiftError>),
    /// Cancellation grace expired while the attempt was still running.
    Interrupted,
}

/// Runs one agent's action graph to a terminal run record.
pub struct ExecutionEngine {
    handlers: Arc<HandlerRegistry>,
    history: Arc<dyn RunHistoryStore>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        history: Arc<dyn RunHistoryStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            handlers,
            history,
            notifier,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Evaluate the agent's conditions and record the gate logs.
    pub fn check_gate(&self, agent: &Agent, facts: &FactSnapshot) -> GateResult {
        let gate = evaluate_gate(&agent.config.conditions, facts);
        for log in &gate.logs {
            if let Err(e) = self.history.append_log(&agent.id, log) {
                warn!(agent_id = %agent.id, error = %e, "Failed to record condition log");
            }
        }
        if !gate.passed {
            debug!(agent_id = %agent.id, "Condition gate closed");
        }
        gate
    }

    /// Execute `plan` for `agent` as run `run_id`.
    ///
    /// Action failures end up in the returned record; an `Err` means the run
    /// could not be recorded at all.
    pub async fn execute(
        &self,
        agent: &Agent,
        plan: &ExecutionPlan,
        run_id: &str,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult, NightshiftError> {
        let run = AgentRunResult {
            id: run_id.to_string(),
            agent_id: agent.id.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            actions: plan
                .actions()
                .iter()
                .map(|a| ActionRunRecord::pending(&a.id, &a.name))
                .collect(),
            output: None,
            error: None,
            annotations: Vec::new(),
        };
        let tracker = RunTracker::start(run, self.history.clone()).await?;

        info!(agent_id = %agent.id, run_id, actions = plan.len(), "Run started");
        tracker.log(AgentLog::info(format!("Run started with {} actions", plan.len())), None).await;
        self.notify(agent, NotificationEvent::Start, &tracker.snapshot().await);

        for group in plan.groups() {
            if cancel.is_cancelled() {
                break;
            }

            let mut runnable = Vec::with_capacity(group.len());
            for &idx in group {
                let mut blocked_by = None;
                for &dep in plan.dependencies(idx) {
                    if tracker.action_status(dep).await != Some(ActionRunStatus::Completed) {
                        blocked_by = Some(plan.action(dep).id.clone());
                        break;
                    }
                }
                match blocked_by {
                    Some(dep_id) => {
                        let message = format!(
                            "Action '{}' skipped: dependency '{}' did not complete",
                            plan.action(idx).id, dep_id
                        );
                        tracker.transition(idx, ActionRunStatus::Skipped, AgentLog::warning(message), |_| {}).await?;
                    }
                    None => runnable.push(idx),
                }
            }

            join_all(
                runnable
                    .into_iter()
                    .map(|idx| self.run_action(agent, plan, idx, &tracker, &cancel)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<()>, NightshiftError>>()?;
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            for idx in 0..plan.len() {
                if tracker.action_status(idx).await == Some(ActionRunStatus::Pending) {
                    let message = format!("Action '{}' skipped: run cancelled", plan.action(idx).id);
                    tracker.transition(idx, ActionRunStatus::Skipped, AgentLog::info(message), |_| {}).await?;
                }
            }
        }

        let snapshot = tracker.snapshot().await;
        let status = aggregate_status(plan, &snapshot.actions, cancelled);
        let count = |s: ActionRunStatus| snapshot.actions.iter().filter(|a| a.status == s).count();
        let output = format!(
            "{} completed, {} failed, {} skipped",
            count(ActionRunStatus::Completed),
            count(ActionRunStatus::Failed),
            count(ActionRunStatus::Skipped)
        );
        let error = match status {
            RunStatus::Failed => Some(
                snapshot
                    .actions
                    .iter()
                    .find_map(|a| a.error.as_ref().map(|e| format!("action '{}': {}", a.action_id, e)))
                    .unwrap_or_else(|| "one or more final actions were skipped".to_string()),
            ),
            RunStatus::Cancelled => Some("run cancelled".to_string()),
            _ => None,
        };

        let final_log = match status {
            RunStatus::Completed => AgentLog::info(format!("Run completed: {}", output)),
            RunStatus::Cancelled => AgentLog::warning(format!("Run cancelled: {}", output)),
            _ => AgentLog::error(format!("Run failed: {}", output)),
        };
        let finished = tracker.finish(status, Some(output), error, final_log).await?;

        info!(agent_id = %agent.id, run_id, status = %finished.status, "Run finished");
        let event = match finished.status {
            RunStatus::Failed => NotificationEvent::Error,
            _ => NotificationEvent::Complete,
        };
        self.notify(agent, event, &finished);
        Ok(finished)
    }

    async fn run_action(
        &self,
        agent: &Agent,
        plan: &ExecutionPlan,
        idx: usize,
        tracker: &RunTracker,
        cancel: &CancellationToken,
    ) -> Result<(), NightshiftError> {
        let action = plan.action(idx);
        if cancel.is_cancelled() {
            let message = format!("Action '{}' skipped: run cancelled", action.id);
            return tracker.transition(idx, ActionRunStatus::Skipped, AgentLog::info(message), |_| {}).await;
        }

        tracker
            .transition(
                idx,
                ActionRunStatus::Running,
                AgentLog::info(format!("Action '{}' ({}) started", action.id, action.kind())),
                |_| {},
            )
            .await?;

        let timeout = action
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_timeout);
        let max_attempts = action.retries() + 1;
        let handler = self.handlers.get(&action.kind());
        let run_id = tracker.snapshot().await.id;

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            tracker.set_attempts(idx, attempt).await;

            let Some(handler) = handler.clone() else {
                break Err(NightshiftError::ActionExecution(format!(
                    "no handler registered for action type '{}'",
                    action.kind()
                )));
            };
            let ctx = ActionContext {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                run_id: run_id.clone(),
                action: action.clone(),
                attempt,
                cancel: cancel.child_token(),
            };

            let err = match self.attempt(handler.execute(ctx), timeout, cancel).await {
                AttemptOutcome::Finished(Ok(output)) => break Ok(output),
                AttemptOutcome::Interrupted => {
                    break Err(NightshiftError::ActionExecution("interrupted".into()));
                }
                AttemptOutcome::Finished(Err(e)) => e,
            };

            let retryable = err.classify().retryable;
            if attempt >= max_attempts || !retryable || cancel.is_cancelled() {
                break Err(err);
            }

            let delay = self.settings.backoff.delay(attempt - 1);
            tracker
                .log(
                    AgentLog::warning(format!(
                        "Action '{}' attempt {}/{} failed, retrying in {}ms: {}",
                        action.id, attempt, max_attempts, delay.as_millis(), err
                    )),
                    Some(&action.id),
                )
                .await;
            debug!(action_id = %action.id, attempt, delay_ms = delay.as_millis() as u64, "Backing off");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break Err(err),
            }
        };

        match outcome {
            Ok(output) => {
                let message = format!("Action '{}' completed after {} attempt(s)", action.id, attempt);
                tracker
                    .transition(idx, ActionRunStatus::Completed, AgentLog::info(message), |record| {
                        record.output = (!output.is_empty()).then_some(output);
                    })
                    .await
            }
            Err(err) => {
                warn!(action_id = %action.id, attempt, error = %err, "Action failed");
                let message = format!("Action '{}' failed after {} attempt(s): {}", action.id, attempt, err);
                tracker
                    .transition(idx, ActionRunStatus::Failed, AgentLog::error(message), |record| {
                        record.error = Some(err.to_string());
                    })
                    .await
            }
        }
    }

    /// One attempt bounded by `timeout`. After cancellation the attempt gets
    /// the grace period to finish on its own.
    async fn attempt<F>(&self, fut: F, timeout: Duration, cancel: &CancellationToken) -> AttemptOutcome
    where
        F: Future<Output = Result<String, NightshiftError>>,
    {
        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => return AttemptOutcome::Finished(result),
            _ = tokio::time::sleep(timeout) => {
                return AttemptOutcome::Finished(Err(NightshiftError::ActionTimeout(format!(
                    "no result after {}s",
                    timeout.as_secs_f64()
                ))));
            }
            _ = cancel.cancelled() => {}
        }

        match tokio::time::timeout(self.settings.cancel_grace, &mut fut).await {
            Ok(result) => AttemptOutcome::Finished(result),
            Err(_) => AttemptOutcome::Interrupted,
        }
    }

    /// Fire-and-forget lifecycle notification.
    fn notify(&self, agent: &Agent, event: NotificationEvent, run: &AgentRunResult) {
        if !agent.config.notifications.wants(event) {
            return;
        }

        let message = match event {
            NotificationEvent::Start => format!("run {} started", run.id),
            _ => format!("run {} {}", run.id, run.status),
        };
        let notification = Notification {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            event,
            channels: agent.config.notifications.channels.clone(),
            payload: json!({
                "runId": run.id,
                "status": run.status.as_str(),
                "message": message,
                "error": run.error,
            }),
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let agent_id = notification.agent_id.clone();
            if let Err(e) = notifier.notify(notification).await {
                warn!(agent_id = %agent_id, event = event.as_str(), error = %e, "Notification delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::resolve;
    use crate::models::{AgentCategory, AgentConfig, CreateAgentParams};
    use crate::notify::LogNotifier;
    use crate::store::{AgentStore, Database};
    use serde_json::json;

    fn setup(actions: serde_json::Value) -> (Database, ExecutionEngine, Agent) {
        let db = Database::in_memory().unwrap();
        let config: AgentConfig = serde_json::from_value(json!({ "actions": actions })).unwrap();
        let agent = db.create_agent(CreateAgentParams {
            id: Some("shell".into()),
            name: "Shell".into(),
            description: String::new(),
            category: AgentCategory::Custom,
            config,
        }).unwrap();
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let engine = ExecutionEngine::new(
            Arc::new(HandlerRegistry::builtin(notifier.clone())),
            Arc::new(db.clone()),
            notifier,
        );
        (db, engine, agent)
    }

    #[tokio::test]
    async fn test_execute_shell_chain() {
        let (db, engine, agent) = setup(json!([
            {"id": "first", "type": "command", "name": "First", "parameters": {"command": "echo one"}},
            {"id": "second", "type": "command", "name": "Second", "parameters": {"command": "echo two"}, "dependsOn": ["first"]}
        ]));
        let plan = resolve(&agent.config.actions).unwrap();

        let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.action("second").unwrap().output.as_deref(), Some("two"));
        assert_eq!(db.get_run("run-1").unwrap().unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_action() {
        let (_db, engine, agent) = setup(json!([
            {"id": "lights", "type": "capture", "name": "Lights", "parameters": {"exposure": 30}}
        ]));
        let plan = resolve(&agent.config.actions).unwrap();

        let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let record = run.action("lights").unwrap();
        assert_eq!(record.status, ActionRunStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn test_empty_agent_completes() {
        let (_db, engine, agent) = setup(json!([]));
        let plan = resolve(&agent.config.actions).unwrap();
        let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_skips_everything() {
        let (_db, engine, agent) = setup(json!([
            {"id": "a", "type": "command", "name": "A", "parameters": {"command": "true"}}
        ]));
        let plan = resolve(&agent.config.actions).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = engine.execute(&agent, &plan, "run-1", cancel).await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.action("a").unwrap().status, ActionRunStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_times_out() {
        let (_db, engine, _agent) = setup(json!([]));
        let outcome = engine
            .attempt(
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("late".to_string())
                },
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome, AttemptOutcome::Finished(Err(NightshiftError::ActionTimeout(_)))));
    }
}
