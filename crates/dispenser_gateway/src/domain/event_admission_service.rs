use crate::domain::{Authenticator, EventDispatcher, EventValidator};
use common::domain::{DeviceRecord, DeviceRepository, DomainError, DomainResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Entry point of the admission pipeline.
///
/// Flow:
/// 1. Validate structure and event type
/// 2. Authenticate the claimed device
/// 3. Dispatch to the transition for the event type and commit it
/// 4. Relay the accepted event (best effort)
///
/// A failure at any step stops the pipeline; nothing after it runs.
pub struct EventAdmissionService {
    validator: EventValidator,
    authenticator: Authenticator,
    dispatcher: EventDispatcher,
    device_repository: Arc<dyn DeviceRepository>,
    registry_timeout: Duration,
}

impl EventAdmissionService {
    pub fn new(
        validator: EventValidator,
        authenticator: Authenticator,
        dispatcher: EventDispatcher,
        device_repository: Arc<dyn DeviceRepository>,
        registry_timeout: Duration,
    ) -> Self {
        Self {
            validator,
            authenticator,
            dispatcher,
            device_repository,
            registry_timeout,
        }
    }

    /// Admit one decoded event body. Returns the device record after the event applied.
    #[instrument(skip(self, body))]
    pub async fn process_event(&self, body: serde_json::Value) -> DomainResult<DeviceRecord> {
        let event = self.validator.validate(&body)?;
        debug!(device_id = %event.device_id, event_type = %event.event_type, "event validated");

        self.authenticator
            .authenticate(&event.device_id, &event.token)
            .await?;

        self.dispatcher.dispatch(&event).await
    }

    /// Every known device, for the listing surface
    #[instrument(skip(self))]
    pub async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>> {
        tokio::time::timeout(self.registry_timeout, self.device_repository.list_devices())
            .await
            .map_err(|_| DomainError::RegistryTimeout("list_devices".to_string()))?
    }
}
