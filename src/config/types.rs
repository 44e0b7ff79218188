use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::engine::EngineSettings;
use crate::errors::BackoffPolicy;
use crate::scheduler::SchedulerSettings;

/// Daemon configuration. Every section is optional.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NightshiftConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub facts: FactsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Command templates for action kinds without a built-in handler.
    #[serde(default)]
    pub handlers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How late an occurrence may still start. Unset means the larger of
    /// 60 s and the poll interval; a value below the poll interval is rejected.
    #[serde(default)]
    pub tolerance_secs: Option<u64>,
    /// Local offset from UTC for calendar schedules and clock facts.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

fn default_poll_interval() -> u64 {
    15
}

const MIN_TOLERANCE_SECS: u64 = 60;

fn default_max_concurrent_runs() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            tolerance_secs: None,
            utc_offset_minutes: 0,
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

impl SchedulerConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    /// Configured tolerance, never shorter than one poll interval.
    pub fn tolerance(&self) -> u64 {
        let poll = self.poll_interval_secs.max(1);
        self.tolerance_secs.unwrap_or(MIN_TOLERANCE_SECS).max(poll)
    }

    pub fn settings(&self) -> SchedulerSettings {
        let defaults = SchedulerSettings::default();
        SchedulerSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            tolerance: Duration::from_secs(self.tolerance()),
            offset: self.offset().unwrap_or(defaults.offset),
            max_concurrent_runs: self.max_concurrent_runs.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_action_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
}

fn default_action_timeout() -> u64 {
    300
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_cancel_grace() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_action_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            cancel_grace_secs: default_cancel_grace(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            default_timeout: Duration::from_secs(self.default_timeout_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("nightshift.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database: default_database() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AgentsConfig {
    /// Directory of `*.yaml` agent definitions synced into the store at startup.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FactsConfig {
    /// JSON fact file maintained by the observatory controller.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}
