use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::debug;

use crate::facts::EventSet;
use crate::models::{Agent, Schedule};
use super::schedule::{latest_occurrence, next_occurrence};

/// Decides whether an agent should start a run at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct TriggerEvaluator {
    tolerance: Duration,
    offset: FixedOffset,
}

impl TriggerEvaluator {
    pub fn new(tolerance: StdDuration, offset: FixedOffset) -> Self {
        Self {
            tolerance: Duration::from_std(tolerance).unwrap_or(Duration::seconds(30)),
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Schedule and event triggers are ORed. Paused agents are never due.
    pub fn is_due(&self, agent: &Agent, now: DateTime<Utc>, events: &EventSet) -> bool {
        if agent.is_paused() {
            return false;
        }

        if let Some(event) = agent.config.triggers.event_names().into_iter().find(|e| events.contains(e)) {
            debug!(agent_id = %agent.id, event, "Trigger event observed");
            return true;
        }

        match &agent.config.schedule {
            Some(schedule) => self.schedule_due(schedule, agent.last_run, now),
            None => false,
        }
    }

    fn schedule_due(&self, schedule: &Schedule, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match latest_occurrence(schedule, now, self.tolerance, self.offset) {
            Some(t) => last_run.map_or(true, |last| last < t),
            None => false,
        }
    }

    /// Next scheduled start after `after`, for `nextRun` bookkeeping.
    /// `None` for consumed one-shot schedules and event-only agents.
    pub fn next_run(&self, agent: &Agent, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let schedule = agent.config.schedule.as_ref()?;
        if let Schedule::Once { date } = schedule {
            let consumed = agent.last_run.is_some_and(|last| last >= *date);
            return (!consumed).then_some(*date);
        }
        next_occurrence(schedule, after, self.offset)
    }
}
