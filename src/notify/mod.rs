pub mod log;
pub mod webhook;

pub use self::log::LogNotifier;
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::NightshiftError;
use crate::models::{NotificationChannel, NotificationEvent};

/// Lifecycle message sent on run start and completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub agent_id: String,
    pub agent_name: String,
    pub event: NotificationEvent,
    pub channels: Vec<NotificationChannel>,
    pub payload: Value,
}

impl Notification {
    pub fn summary(&self) -> String {
        let detail = self.payload.get("message").and_then(Value::as_str).unwrap_or("");
        if detail.is_empty() {
            format!("[{}] {}", self.event.as_str(), self.agent_name)
        } else {
            format!("[{}] {}: {}", self.event.as_str(), self.agent_name, detail)
        }
    }
}

/// Delivery backend for notifications. Delivery failures never affect the run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NightshiftError>;
}
