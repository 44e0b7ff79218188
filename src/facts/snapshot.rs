use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConditionType, FactValue};

/// Point-in-time view of external state (weather, equipment, time, custom).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSnapshot {
    facts: HashMap<String, FactValue>,
}

impl FactSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FactValue>) {
        self.facts.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key)
    }

    /// Resolve a condition parameter: `<type>.<parameter>` wins over the bare key.
    pub fn lookup(&self, condition_type: ConditionType, parameter: &str) -> Option<&FactValue> {
        self.facts
            .get(&format!("{}.{}", condition_type.as_str(), parameter))
            .or_else(|| self.facts.get(parameter))
    }

    pub fn merge(&mut self, other: FactSnapshot) {
        self.facts.extend(other.facts);
    }

    /// Add clock facts for `now` seen at `offset`. Existing keys are kept.
    pub fn with_clock(mut self, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset);
        let clock = [
            ("time.hour", FactValue::Number(local.hour() as f64)),
            ("time.minute", FactValue::Number(local.minute() as f64)),
            ("time.weekday", FactValue::Number(local.weekday().num_days_from_sunday() as f64)),
            ("time.dayOfMonth", FactValue::Number(local.day() as f64)),
            ("time.date", FactValue::Text(local.format("%Y-%m-%d").to_string())),
        ];
        for (key, value) in clock {
            self.facts.entry(key.to_string()).or_insert(value);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl FromIterator<(String, FactValue)> for FactSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, FactValue)>>(iter: I) -> Self {
        Self { facts: iter.into_iter().collect() }
    }
}

/// Named events observed since the previous poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSet {
    events: BTreeSet<String>,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: impl Into<String>) {
        self.events.insert(event.into());
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    pub fn extend(&mut self, other: EventSet) {
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|s| s.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for EventSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self { events: iter.into_iter().map(Into::into).collect() }
    }
}
