use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::NightshiftError;
use crate::graph::{resolve, ExecutionPlan};
use crate::models::{Agent, AgentStatus};
use crate::store::AgentStore;

/// An agent definition together with its resolved action graph.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub agent: Agent,
    pub plan: Arc<ExecutionPlan>,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

type ActiveRuns = Arc<Mutex<HashMap<String, ActiveRun>>>;

fn lock_active(active: &ActiveRuns) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
    // A panic while holding the guard cannot leave the map half-updated.
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive right to run an agent. Dropping it releases the agent.
#[derive(Debug)]
pub struct RunClaim {
    active: ActiveRuns,
    agent_id: String,
    run_id: String,
    cancel: CancellationToken,
}

impl RunClaim {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        let mut active = lock_active(&self.active);
        if active.get(&self.agent_id).is_some_and(|r| r.run_id == self.run_id) {
            active.remove(&self.agent_id);
        }
    }
}

/// In-memory view of every schedulable agent plus the per-agent run guard.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<RegisteredAgent>>,
    active: ActiveRuns,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents with the agents in `store`.
    /// Definitions that no longer validate are skipped with a warning.
    pub fn sync_from(&self, store: &dyn AgentStore) -> Result<usize, NightshiftError> {
        let agents = store.list_agents()?;
        let ids: Vec<String> = agents.iter().map(|a| a.id.clone()).collect();
        self.agents.retain(|id, _| ids.contains(id));

        let mut loaded = 0;
        for agent in agents {
            let id = agent.id.clone();
            match self.register(agent) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "Skipping agent with invalid definition");
                    self.agents.remove(&id);
                }
            }
        }
        info!(agents = loaded, "Agent registry synchronised");
        Ok(loaded)
    }

    /// Resolve the action graph and (re)register the agent. Running runs keep
    /// the definition they started with.
    pub fn register(&self, agent: Agent) -> Result<(), NightshiftError> {
        let plan = Arc::new(resolve(&agent.config.actions)?);
        debug!(agent_id = %agent.id, actions = plan.len(), groups = plan.groups().len(), "Agent registered");
        self.agents.insert(agent.id.clone(), Arc::new(RegisteredAgent { agent, plan }));
        Ok(())
    }

    pub fn remove(&self, agent_id: &str) -> bool {
        self.agents.remove(agent_id).is_some()
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<RegisteredAgent>> {
        self.agents.get(agent_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all registered agents, ordered by id.
    pub fn agents(&self) -> Vec<Arc<RegisteredAgent>> {
        let mut all: Vec<Arc<RegisteredAgent>> = self.agents.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.agent.id.cmp(&b.agent.id));
        all
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Mirror run bookkeeping into the cached definition. An explicit pause is kept.
    pub fn update_runtime(
        &self,
        agent_id: &str,
        status: AgentStatus,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) {
        if let Some(mut entry) = self.agents.get_mut(agent_id) {
            let mut updated = (**entry).clone();
            if !updated.agent.is_paused() {
                updated.agent.status = status;
            }
            updated.agent.last_run = last_run;
            updated.agent.next_run = next_run;
            *entry = Arc::new(updated);
        }
    }

    /// Claim the agent for a new run. `None` if a run is already in flight.
    pub fn try_claim(&self, agent_id: &str) -> Option<RunClaim> {
        let mut active = lock_active(&self.active);
        if active.contains_key(agent_id) {
            return None;
        }

        let run_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        active.insert(
            agent_id.to_string(),
            ActiveRun { run_id: run_id.clone(), cancel: cancel.clone(), started_at: Utc::now() },
        );
        Some(RunClaim {
            active: self.active.clone(),
            agent_id: agent_id.to_string(),
            run_id,
            cancel,
        })
    }

    pub fn is_running(&self, agent_id: &str) -> bool {
        lock_active(&self.active).contains_key(agent_id)
    }

    /// Run id and start of the in-flight run, if any.
    pub fn active_run(&self, agent_id: &str) -> Option<(String, DateTime<Utc>)> {
        lock_active(&self.active)
            .get(agent_id)
            .map(|r| (r.run_id.clone(), r.started_at))
    }

    pub fn active_count(&self) -> usize {
        lock_active(&self.active).len()
    }

    /// Request cancellation of the agent's in-flight run.
    pub fn cancel(&self, agent_id: &str) -> bool {
        match lock_active(&self.active).get(agent_id) {
            Some(run) => {
                info!(agent_id, run_id = %run.run_id, "Cancellation requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (agent_id, run) in lock_active(&self.active).iter() {
            debug!(agent_id = %agent_id, run_id = %run.run_id, "Cancelling run for shutdown");
            run.cancel.cancel();
        }
    }
}
