use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::NightshiftError;
use super::action::AgentAction;
use super::condition::AgentCondition;
use super::log::AgentLog;
use super::run::RunStatus;

pub const EVENT_EQUIPMENT_CONNECT: &str = "equipmentConnect";
pub const EVENT_SUNSET: &str = "sunset";
pub const EVENT_WEATHER_CLEAR: &str = "weatherClear";

/// A named automation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: AgentStatus,
    #[serde(rename = "type")]
    pub category: AgentCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: AgentConfig,
    #[serde(default)]
    pub logs: Vec<AgentLog>,
}

impl Agent {
    pub fn is_paused(&self) -> bool {
        self.status == AgentStatus::Paused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Paused,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Agent status after a run reached `run`. A paused agent stays paused.
    pub fn after_run(self, run: RunStatus) -> Self {
        if self == Self::Paused {
            return Self::Paused;
        }
        match run {
            RunStatus::Running => Self::Running,
            RunStatus::Completed | RunStatus::Cancelled => Self::Idle,
            RunStatus::Failed => Self::Error,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    Observation,
    Imaging,
    Processing,
    Analysis,
    #[default]
    Custom,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Imaging => "imaging",
            Self::Processing => "processing",
            Self::Analysis => "analysis",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observation" => Some(Self::Observation),
            "imaging" => Some(Self::Imaging),
            "processing" => Some(Self::Processing),
            "analysis" => Some(Self::Analysis),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Declarative definition of what an agent does and when.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub triggers: Triggers,
    #[serde(default)]
    pub actions: Vec<AgentAction>,
    #[serde(default)]
    pub conditions: Vec<AgentCondition>,
    #[serde(default)]
    pub notifications: Notifications,
}

impl AgentConfig {
    /// Definition-time checks beyond what decoding enforces: a valid action
    /// graph and non-zero timeouts. Schedules are checked while decoding.
    pub fn validate(&self) -> Result<(), NightshiftError> {
        crate::graph::resolve(&self.actions)?;
        if let Some(action) = self.actions.iter().find(|a| a.timeout == Some(0)) {
            return Err(NightshiftError::Validation(format!(
                "action '{}' has a zero timeout",
                action.id
            )));
        }
        Ok(())
    }
}

/// Time-based schedule. Exactly one shape per `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchedule", into = "RawSchedule")]
pub enum Schedule {
    Once { date: DateTime<Utc> },
    Daily { time: NaiveTime },
    /// `days` holds weekday numbers, 0 = Sunday.
    Weekly { time: NaiveTime, days: BTreeSet<u32> },
    /// `days` holds days of the month, 1..=31.
    Monthly { time: NaiveTime, days: BTreeSet<u32> },
    /// Cron expression with a seconds field.
    Custom { expression: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSchedule {
    #[serde(rename = "type")]
    pub kind: ScheduleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, NightshiftError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| NightshiftError::Schedule(format!("invalid time of day '{}', expected HH:MM", s)))
}

fn format_time_of_day(time: &NaiveTime) -> String {
    if time.second() == 0 {
        time.format("%H:%M").to_string()
    } else {
        time.format("%H:%M:%S").to_string()
    }
}

impl TryFrom<RawSchedule> for Schedule {
    type Error = NightshiftError;

    fn try_from(raw: RawSchedule) -> Result<Self, Self::Error> {
        let kind = raw.kind;
        let reject = |field: &str| {
            NightshiftError::Schedule(format!(
                "field '{}' is not allowed for a {:?} schedule",
                field, kind
            ))
        };
        let require = |field: &str| {
            NightshiftError::Schedule(format!(
                "field '{}' is required for a {:?} schedule",
                field, kind
            ))
        };
        let supplied = [
            ("time", raw.time.is_some()),
            ("days", raw.days.is_some()),
            ("date", raw.date.is_some()),
            ("expression", raw.expression.is_some()),
        ];
        let forbid = |fields: &[&str]| {
            let extra = supplied
                .iter()
                .find(|(name, set)| *set && fields.contains(name));
            match extra {
                Some((name, _)) => Err(reject(name)),
                None => Ok(()),
            }
        };

        match kind {
            ScheduleType::Once => {
                forbid(&["time", "days", "expression"])?;
                let date = raw.date.ok_or_else(|| require("date"))?;
                Ok(Schedule::Once { date })
            }
            ScheduleType::Daily => {
                forbid(&["days", "date", "expression"])?;
                let time = parse_time_of_day(raw.time.as_deref().ok_or_else(|| require("time"))?)?;
                Ok(Schedule::Daily { time })
            }
            ScheduleType::Weekly | ScheduleType::Monthly => {
                forbid(&["date", "expression"])?;
                let time = parse_time_of_day(raw.time.as_deref().ok_or_else(|| require("time"))?)?;
                let days: BTreeSet<u32> = raw.days.ok_or_else(|| require("days"))?.into_iter().collect();
                if days.is_empty() {
                    return Err(NightshiftError::Schedule(format!("{:?} schedule needs at least one day", kind)));
                }
                if kind == ScheduleType::Weekly {
                    if let Some(bad) = days.iter().find(|d| **d > 6) {
                        return Err(NightshiftError::Schedule(format!("weekday {} out of range 0-6", bad)));
                    }
                    Ok(Schedule::Weekly { time, days })
                } else {
                    if let Some(bad) = days.iter().find(|d| **d == 0 || **d > 31) {
                        return Err(NightshiftError::Schedule(format!("day of month {} out of range 1-31", bad)));
                    }
                    Ok(Schedule::Monthly { time, days })
                }
            }
            ScheduleType::Custom => {
                forbid(&["time", "days", "date"])?;
                let expression = raw.expression.ok_or_else(|| require("expression"))?;
                cron::Schedule::from_str(&expression).map_err(|e| {
                    NightshiftError::Schedule(format!("invalid recurrence expression '{}': {}", expression, e))
                })?;
                Ok(Schedule::Custom { expression })
            }
        }
    }
}

impl From<Schedule> for RawSchedule {
    fn from(schedule: Schedule) -> Self {
        let empty = |kind| RawSchedule { kind, time: None, days: None, date: None, expression: None };
        match schedule {
            Schedule::Once { date } => RawSchedule { date: Some(date), ..empty(ScheduleType::Once) },
            Schedule::Daily { time } => RawSchedule {
                time: Some(format_time_of_day(&time)),
                ..empty(ScheduleType::Daily)
            },
            Schedule::Weekly { time, days } => RawSchedule {
                time: Some(format_time_of_day(&time)),
                days: Some(days.into_iter().collect()),
                ..empty(ScheduleType::Weekly)
            },
            Schedule::Monthly { time, days } => RawSchedule {
                time: Some(format_time_of_day(&time)),
                days: Some(days.into_iter().collect()),
                ..empty(ScheduleType::Monthly)
            },
            Schedule::Custom { expression } => RawSchedule {
                expression: Some(expression),
                ..empty(ScheduleType::Custom)
            },
        }
    }
}

/// Event-based triggers; any enabled one whose event is present fires the agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triggers {
    #[serde(default)]
    pub on_equipment_connect: bool,
    #[serde(default)]
    pub on_sunset: bool,
    #[serde(default)]
    pub on_weather_clear: bool,
    /// Name of a custom event that fires the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_custom_condition: Option<String>,
}

impl Triggers {
    /// Names of the events this agent reacts to.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if self.on_equipment_connect {
            names.push(EVENT_EQUIPMENT_CONNECT);
        }
        if self.on_sunset {
            names.push(EVENT_SUNSET);
        }
        if self.on_weather_clear {
            names.push(EVENT_WEATHER_CLEAR);
        }
        if let Some(custom) = self.on_custom_condition.as_deref() {
            if !custom.is_empty() {
                names.push(custom);
            }
        }
        names
    }

    pub fn any(&self) -> bool {
        !self.event_names().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notifications {
    #[serde(default)]
    pub on_start: bool,
    #[serde(default)]
    pub on_complete: bool,
    #[serde(default)]
    pub on_error: bool,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Push,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
            Self::Sms => "sms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    Start,
    Complete,
    Error,
    /// Sent by a `notification` action rather than by the run lifecycle.
    Message,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Message => "message",
        }
    }
}

impl Notifications {
    pub fn wants(&self, event: NotificationEvent) -> bool {
        match event {
            NotificationEvent::Start => self.on_start,
            NotificationEvent::Complete => self.on_complete,
            NotificationEvent::Error => self.on_error,
            NotificationEvent::Message => true,
        }
    }
}

/// Parameters for creating an agent. The store assigns timestamps, and an id
/// unless one is given (agent definition files carry stable ids).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentParams {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub category: AgentCategory,
    #[serde(default)]
    pub config: AgentConfig,
}

/// Partial update of an agent definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(rename = "type", default)]
    pub category: Option<AgentCategory>,
    #[serde(default)]
    pub config: Option<AgentConfig>,
}

impl AgentPatch {
    pub fn apply(self, agent: &mut Agent) {
        if let Some(name) = self.name {
            agent.name = name;
        }
        if let Some(description) = self.description {
            agent.description = description;
        }
        if let Some(status) = self.status {
            agent.status = status;
        }
        if let Some(category) = self.category {
            agent.category = category;
        }
        if let Some(config) = self.config {
            agent.config = config;
        }
        agent.updated_at = Utc::now();
    }
}
