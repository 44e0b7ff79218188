use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::NightshiftError;
use crate::models::FactValue;
use super::snapshot::{EventSet, FactSnapshot};

/// Supplier of facts and events, consulted once per scheduler cycle.
#[async_trait]
pub trait FactSource: Send + Sync {
    async fn current_facts(&self) -> Result<FactSnapshot, NightshiftError>;

    /// Events observed since the previous call. Each event is reported once.
    async fn recent_events(&self) -> Result<EventSet, NightshiftError>;
}

/// In-process fact source fed by the API or by tests.
#[derive(Default)]
pub struct StaticFactSource {
    facts: Mutex<FactSnapshot>,
    pending_events: Mutex<EventSet>,
}

impl StaticFactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fact(&self, key: impl Into<String>, value: impl Into<FactValue>) {
        self.facts.lock().await.insert(key, value);
    }

    pub async fn replace_facts(&self, facts: FactSnapshot) {
        *self.facts.lock().await = facts;
    }

    pub async fn merge_facts(&self, facts: FactSnapshot) {
        self.facts.lock().await.merge(facts);
    }

    pub async fn push_event(&self, event: impl Into<String>) {
        self.pending_events.lock().await.insert(event);
    }
}

#[async_trait]
impl FactSource for StaticFactSource {
    async fn current_facts(&self) -> Result<FactSnapshot, NightshiftError> {
        Ok(self.facts.lock().await.clone())
    }

    async fn recent_events(&self) -> Result<EventSet, NightshiftError> {
        Ok(std::mem::take(&mut *self.pending_events.lock().await))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FactFile {
    #[serde(default)]
    facts: FactSnapshot,
    #[serde(default)]
    events: EventSet,
}

/// Reads facts from a JSON file written by an external observatory controller:
/// `{"facts": {...}, "events": ["sunset", ...]}`. Events are reported only when
/// the file has changed since the previous read.
pub struct FileFactSource {
    path: PathBuf,
    last_events_read: Mutex<Option<SystemTime>>,
}

impl FileFactSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_events_read: Mutex::new(None),
        }
    }

    async fn read(&self) -> Result<Option<FactFile>, NightshiftError> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "Fact file not present yet");
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[async_trait]
impl FactSource for FileFactSource {
    async fn current_facts(&self) -> Result<FactSnapshot, NightshiftError> {
        Ok(self.read().await?.map(|f| f.facts).unwrap_or_default())
    }

    async fn recent_events(&self) -> Result<EventSet, NightshiftError> {
        let modified = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EventSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut last = self.last_events_read.lock().await;
        if last.is_some_and(|seen| seen >= modified) {
            return Ok(EventSet::new());
        }
        *last = Some(modified);
        Ok(self.read().await?.map(|f| f.events).unwrap_or_default())
    }
}

/// API-pushed facts and events on top of an optional external source.
/// Overlay facts win on key clashes; events from both are reported.
pub struct LayeredFactSource {
    base: Option<Arc<dyn FactSource>>,
    overlay: Arc<StaticFactSource>,
}

impl LayeredFactSource {
    pub fn new(base: Option<Arc<dyn FactSource>>, overlay: Arc<StaticFactSource>) -> Self {
        Self { base, overlay }
    }
}

#[async_trait]
impl FactSource for LayeredFactSource {
    async fn current_facts(&self) -> Result<FactSnapshot, NightshiftError> {
        let mut facts = match &self.base {
            Some(base) => base.current_facts().await?,
            None => FactSnapshot::new(),
        };
        facts.merge(self.overlay.current_facts().await?);
        Ok(facts)
    }

    async fn recent_events(&self) -> Result<EventSet, NightshiftError> {
        let mut events = self.overlay.recent_events().await?;
        if let Some(base) = &self.base {
            events.extend(base.recent_events().await?);
        }
        Ok(events)
    }
}
