use crate::domain::{DomainError, DomainResult, EventPublisher, OutboundEvent};
use crate::nats::traits::JetStreamPublisher;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Publishes accepted dispenser events to JetStream, one subject per event type
pub struct NatsEventPublisher {
    jetstream: Arc<dyn JetStreamPublisher>,
    base_subject: String,
}

impl NatsEventPublisher {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, base_subject: String) -> Self {
        info!(base_subject = %base_subject, "Created NatsEventPublisher");
        Self {
            jetstream,
            base_subject,
        }
    }

    fn subject_for(&self, event: &OutboundEvent) -> String {
        format!("{}.{}", self.base_subject, event.event_type.subject_token())
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &OutboundEvent) -> DomainResult<()> {
        let payload = serde_json::to_vec(event)
            .context("Failed to encode outbound event")
            .map_err(DomainError::RepositoryError)?;

        // Build subject: {base_subject}.{event_type}
        let subject = self.subject_for(event);

        debug!(
            subject = %subject,
            device_id = %event.device_id,
            size_bytes = payload.len(),
            "Publishing dispenser event"
        );

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| {
                DomainError::RelayUnavailable(format!(
                    "Failed to publish and acknowledge message on {}: {:#}",
                    subject, e
                ))
            })?;

        debug!(subject = %subject, device_id = %event.device_id, "Published dispenser event");

        Ok(())
    }
}
