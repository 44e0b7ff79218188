use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::engine::ExecutionEngine;
use crate::errors::NightshiftError;
use crate::facts::{FactSnapshot, FactSource};
use crate::models::{Agent, AgentRunResult, AgentStatus};
use crate::store::AgentStore;
use crate::triggers::TriggerEvaluator;
use super::registry::{AgentRegistry, RegisteredAgent, RunClaim};
use super::slots::RunSlots;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    /// How late a scheduled occurrence may still start.
    pub tolerance: Duration,
    /// Local offset used for calendar schedules and clock facts.
    pub offset: FixedOffset,
    pub max_concurrent_runs: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            tolerance: Duration::from_secs(60),
            offset: Utc.fix(),
            max_concurrent_runs: 4,
        }
    }
}

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    pub agent_id: String,
    pub run_id: String,
    result: oneshot::Receiver<Result<AgentRunResult, NightshiftError>>,
}

impl RunHandle {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<AgentRunResult, NightshiftError> {
        self.result
            .await
            .map_err(|_| NightshiftError::Internal(format!("run {} ended without a result", self.run_id)))?
    }
}

/// What happened to a request to start an agent.
#[derive(Debug)]
pub enum Submission {
    Started(RunHandle),
    /// Another run of the agent is in flight; nothing was started.
    AlreadyRunning { run_id: Option<String> },
    /// At least one condition did not hold.
    GateClosed,
    Paused,
}

impl Submission {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::AlreadyRunning { .. } => "alreadyRunning",
            Self::GateClosed => "gateClosed",
            Self::Paused => "paused",
        }
    }
}

/// State shared with spawned run tasks.
#[derive(Clone)]
struct RunShared {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn AgentStore>,
    engine: Arc<ExecutionEngine>,
    triggers: TriggerEvaluator,
    slots: RunSlots,
}

impl RunShared {
    fn mark(&self, agent_id: &str, status: AgentStatus, last_run: Option<DateTime<Utc>>, next_run: Option<DateTime<Utc>>) {
        if let Err(e) = self.store.record_agent_state(agent_id, status, last_run, next_run) {
            warn!(agent_id, error = %e, "Failed to record agent state");
        }
        self.registry.update_runtime(agent_id, status, last_run, next_run);
    }

    async fn drive(self, registered: Arc<RegisteredAgent>, claim: RunClaim) -> Result<AgentRunResult, NightshiftError> {
        let _permit = self.slots.acquire().await?;
        let agent = &registered.agent;
        let started = Utc::now();
        self.mark(&agent.id, AgentStatus::Running, Some(started), agent.next_run);

        let result = self
            .engine
            .execute(agent, &registered.plan, claim.run_id(), claim.cancel_token())
            .await;

        let ran = Agent { last_run: Some(started), ..agent.clone() };
        let next_run = self.triggers.next_run(&ran, Utc::now());
        let status = match &result {
            Ok(run) => agent.status.after_run(run.status),
            Err(e) => {
                error!(agent_id = %agent.id, run_id = claim.run_id(), error = %e, "Run could not be recorded");
                AgentStatus::Error
            }
        };
        self.mark(&agent.id, status, Some(started), next_run);

        // Released only after bookkeeping so a poll cannot see a stale lastRun.
        drop(claim);
        result
    }
}

/// Polls triggers, applies the condition gate and starts runs.
pub struct Scheduler {
    shared: RunShared,
    facts: Arc<dyn FactSource>,
    tracker: TaskTracker,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn AgentStore>,
        facts: Arc<dyn FactSource>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        let settings = SchedulerSettings::default();
        Self {
            shared: RunShared {
                registry,
                store,
                engine,
                triggers: TriggerEvaluator::new(settings.tolerance, settings.offset),
                slots: RunSlots::new(settings.max_concurrent_runs),
            },
            facts,
            tracker: TaskTracker::new(),
            settings,
        }
    }

    /// The tolerance is raised to the poll interval when shorter, so no
    /// occurrence can fall between two polls.
    pub fn with_settings(mut self, mut settings: SchedulerSettings) -> Self {
        settings.tolerance = settings.tolerance.max(settings.poll_interval);
        self.shared.triggers = TriggerEvaluator::new(settings.tolerance, settings.offset);
        self.shared.slots = RunSlots::new(settings.max_concurrent_runs);
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.shared.registry
    }

    pub fn triggers(&self) -> &TriggerEvaluator {
        &self.shared.triggers
    }

    /// Reload every agent definition from the store.
    pub fn reload(&self) -> Result<usize, NightshiftError> {
        self.shared.registry.sync_from(self.shared.store.as_ref())
    }

    /// Make a new or edited definition visible to the next cycle, with a fresh `nextRun`.
    pub fn register(&self, agent: Agent) -> Result<(), NightshiftError> {
        let next_run = self.shared.triggers.next_run(&agent, Utc::now());
        let (id, status, last_run) = (agent.id.clone(), agent.status, agent.last_run);
        self.shared.registry.register(agent)?;
        if status != AgentStatus::Running {
            self.shared.mark(&id, status, last_run, next_run);
        }
        Ok(())
    }

    /// Forget an agent, cancelling its in-flight run.
    pub fn unregister(&self, agent_id: &str) -> bool {
        self.shared.registry.cancel(agent_id);
        self.shared.registry.remove(agent_id)
    }

    pub fn cancel(&self, agent_id: &str) -> bool {
        self.shared.registry.cancel(agent_id)
    }

    pub fn active_runs(&self) -> usize {
        self.shared.registry.active_count()
    }

    async fn facts_at(&self, now: DateTime<Utc>) -> Result<FactSnapshot, NightshiftError> {
        Ok(self
            .facts
            .current_facts()
            .await?
            .with_clock(now, self.shared.triggers.offset()))
    }

    /// One scheduler cycle: start every due agent whose gate passes.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<Vec<(String, Submission)>, NightshiftError> {
        let facts = self.facts_at(now).await?;
        let events = self.facts.recent_events().await?;

        let mut submissions = Vec::new();
        for registered in self.shared.registry.agents() {
            if !self.shared.triggers.is_due(&registered.agent, now, &events) {
                continue;
            }
            let agent_id = registered.agent.id.clone();
            let submission = self.submit(registered, &facts)?;
            debug!(agent_id = %agent_id, outcome = submission.as_str(), "Due agent submitted");
            submissions.push((agent_id, submission));
        }
        Ok(submissions)
    }

    /// Start the agent now regardless of its triggers. The gate and the
    /// single-run guard still apply.
    pub async fn trigger_now(&self, agent_id: &str) -> Result<Submission, NightshiftError> {
        let registered = self
            .shared
            .registry
            .get(agent_id)
            .ok_or_else(|| NightshiftError::NotFound(format!("agent '{}'", agent_id)))?;
        let facts = self.facts_at(Utc::now()).await?;
        info!(agent_id, "Manual trigger");
        self.submit(registered, &facts)
    }

    fn submit(&self, registered: Arc<RegisteredAgent>, facts: &FactSnapshot) -> Result<Submission, NightshiftError> {
        if self.tracker.is_closed() {
            return Err(NightshiftError::Validation("scheduler is shutting down".into()));
        }
        let agent = &registered.agent;
        if agent.is_paused() {
            return Ok(Submission::Paused);
        }

        let Some(claim) = self.shared.registry.try_claim(&agent.id) else {
            let run_id = self.shared.registry.active_run(&agent.id).map(|(id, _)| id);
            debug!(agent_id = %agent.id, run_id = ?run_id, "Run already in flight, skipping");
            return Ok(Submission::AlreadyRunning { run_id });
        };

        if !self.shared.engine.check_gate(agent, facts).passed {
            return Ok(Submission::GateClosed);
        }

        let agent_id = agent.id.clone();
        let run_id = claim.run_id().to_string();
        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        self.tracker.spawn(async move {
            let result = shared.drive(registered, claim).await;
            // The submitter may not be waiting.
            let _ = tx.send(result);
        });

        Ok(Submission::Started(RunHandle { agent_id, run_id, result: rx }))
    }

    /// Poll until `shutdown` fires, then cancel and drain in-flight runs.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            agents = self.shared.registry.len(),
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            max_concurrent_runs = self.shared.slots.capacity(),
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.poll_once(Utc::now()).await {
                        Ok(submissions) => {
                            let started = submissions.iter().filter(|(_, s)| s.is_started()).count();
                            if started > 0 {
                                info!(started, "Scheduler cycle started runs");
                            }
                        }
                        Err(e) => warn!(error = %e, "Scheduler cycle failed"),
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Cancel every in-flight run and wait for all run tasks to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let active = self.shared.registry.active_count();
        if active > 0 {
            info!(active, "Cancelling in-flight runs");
        }
        self.shared.registry.cancel_all();
        self.tracker.wait().await;
        info!("Scheduler stopped");
    }
}
