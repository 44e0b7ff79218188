use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::errors::{with_retry, NightshiftError, RetryConfig};
use super::{Notification, Notifier};

/// POSTs each notification as JSON to a fixed URL, retrying transient failures.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    retry: RetryConfig,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NightshiftError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NightshiftError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, notification: &Notification) -> Result<(), NightshiftError> {
        let resp = self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NightshiftError::Notification(format!("Webhook request failed: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NightshiftError::Notification(format!("Webhook returned {}", status)));
        }
        if !status.is_success() {
            // 4xx will not improve on retry
            return Err(NightshiftError::Config(format!("Webhook rejected notification: {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NightshiftError> {
        with_retry("webhook_notify", &self.retry, || self.post(&notification)).await?;
        debug!(agent_id = %notification.agent_id, event = notification.event.as_str(), "Webhook delivered");
        Ok(())
    }
}
