//! Notification sink seam. The real notification center is an external
//! collaborator; this crate only publishes events at the interface.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceModule {
    PriceAlert,
    System,
}

/// Event handed to the notification center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub user_id: i64,
    pub source_module: SourceModule,
    pub title: String,
    pub content: String,
    /// Row that triggered the event (alert id for price alerts).
    pub related_id: i64,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: NotificationEvent) -> Result<()>;
}

/// Log-only sink; stands in wherever no notification center is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, event: NotificationEvent) -> Result<()> {
        info!(
            user = event.user_id,
            source = ?event.source_module,
            related_id = event.related_id,
            title = %event.title,
            "notification published"
        );
        Ok(())
    }
}

/// Collecting sink for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<NotificationEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("test mutex").clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, event: NotificationEvent) -> Result<()> {
        self.events.lock().expect("test mutex").push(event);
        Ok(())
    }
}
