use async_trait::async_trait;
use common::domain::{DomainResult, EventPublisher, OutboundEvent};
use tracing::info;

/// Writes relayed events to the log instead of a message bus.
/// Used when no bus is configured.
pub struct LoggingEventPublisher {
    base_subject: String,
}

impl LoggingEventPublisher {
    pub fn new(base_subject: impl Into<String>) -> Self {
        Self {
            base_subject: base_subject.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: &OutboundEvent) -> DomainResult<()> {
        info!(
            subject = %format!("{}.{}", self.base_subject, event.event_type.subject_token()),
            device_id = %event.device_id,
            event_type = %event.event_type,
            phase = %event.device.phase,
            dispensed = event.device.dispensed,
            payload = %serde_json::Value::Object(event.payload.clone()),
            "relayed dispenser event"
        );
        Ok(())
    }
}
