use async_trait::async_trait;
use tracing::info;

use crate::errors::NightshiftError;
use super::{Notification, Notifier};

/// Writes notifications to the tracing log. Used when no transport is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NightshiftError> {
        let channels: Vec<&str> = notification.channels.iter().map(|c| c.as_str()).collect();
        info!(
            agent_id = %notification.agent_id,
            event = notification.event.as_str(),
            channels = %channels.join(","),
            "{}",
            notification.summary()
        );
        Ok(())
    }
}
