use crate::domain::{plan_transition, DeviceDefaults, Transition};
use common::domain::{
    DeviceEvent, DeviceId, DeviceRecord, DeviceRepository, DomainError, DomainResult, EventRelay,
    EventType, GetDeviceRepoInput, OutboundEvent,
};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub defaults: DeviceDefaults,
    /// Upper bound on every single registry call
    pub registry_timeout: Duration,
    /// Extra attempts after a lost compare-and-set
    pub max_conflict_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            defaults: DeviceDefaults::default(),
            registry_timeout: Duration::from_secs(2),
            max_conflict_retries: 3,
        }
    }
}

/// One async mutex per device id. tokio's mutex hands out the lock in
/// request order, so events for one device commit in arrival order.
#[derive(Default)]
struct DeviceLocks {
    locks: DashMap<DeviceId, Arc<Mutex<()>>>,
}

impl DeviceLocks {
    async fn acquire(&self, device_id: &DeviceId) -> DeviceLockGuard<'_> {
        let lock = self
            .locks
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        DeviceLockGuard {
            locks: self,
            device_id: device_id.clone(),
            guard: Some(guard),
        }
    }

    fn release(&self, device_id: &DeviceId) {
        // Only the map's own handle left: nobody holds or waits on this lock
        self.locks
            .remove_if(device_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct DeviceLockGuard<'a> {
    locks: &'a DeviceLocks,
    device_id: DeviceId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.device_id);
    }
}

/// Applies authenticated events to the device registry and hands accepted
/// events to the relay
pub struct EventDispatcher {
    device_repository: Arc<dyn DeviceRepository>,
    relay: Arc<dyn EventRelay>,
    locks: DeviceLocks,
    config: DispatcherConfig,
}

impl EventDispatcher {
    pub fn new(
        device_repository: Arc<dyn DeviceRepository>,
        relay: Arc<dyn EventRelay>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            device_repository,
            relay,
            locks: DeviceLocks::default(),
            config,
        }
    }

    /// Apply `event` and return the resulting record.
    /// A rejected event leaves the registry untouched and is not relayed.
    #[instrument(skip(self, event), fields(device_id = %event.device_id, event_type = %event.event_type))]
    pub async fn dispatch(&self, event: &DeviceEvent) -> DomainResult<DeviceRecord> {
        let _lock = self.locks.acquire(&event.device_id).await;

        let record = self.apply(event).await?;

        if event.event_type == EventType::Startup {
            self.log_registry_snapshot().await;
        }

        if let Err(e) = self
            .relay
            .publish(OutboundEvent::accepted(event, record.clone()))
        {
            warn!(device_id = %event.device_id, error = %e, "failed to relay accepted event");
        }

        Ok(record)
    }

    async fn apply(&self, event: &DeviceEvent) -> DomainResult<DeviceRecord> {
        let mut attempt = 0;
        loop {
            let current = self
                .bounded(
                    "get_device",
                    self.device_repository.get_device(GetDeviceRepoInput {
                        device_id: event.device_id.clone(),
                    }),
                )
                .await?;

            let transition = plan_transition(current.as_ref(), event, &self.config.defaults)
                .map_err(|e| {
                    warn!(device_id = %event.device_id, error = %e, "Request rejected");
                    e
                })?;

            let committed = match transition {
                Transition::Unchanged(record) => {
                    debug!(device_id = %record.device_id, "event accepted without state change");
                    Ok(record)
                }
                Transition::Create(input) => {
                    let outcome = self
                        .bounded(
                            "create_device_if_absent",
                            self.device_repository.create_device_if_absent(input),
                        )
                        .await?;
                    if outcome.created {
                        info!(
                            device_id = %outcome.device.device_id,
                            capacity = outcome.device.capacity,
                            "device registered"
                        );
                    } else {
                        debug!(device_id = %outcome.device.device_id, "device registered elsewhere first");
                    }
                    Ok(outcome.device)
                }
                Transition::Update(input) => {
                    self.bounded(
                        "update_device_if_match",
                        self.device_repository.update_device_if_match(input),
                    )
                    .await
                }
            };

            match committed {
                Err(DomainError::VersionConflict(id)) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(device_id = %id, attempt, "device record changed concurrently, retrying");
                }
                Ok(record) => {
                    info!(
                        device_id = %record.device_id,
                        event_type = %event.event_type,
                        phase = %record.phase,
                        dispensed = record.dispensed,
                        "event applied"
                    );
                    return Ok(record);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Diagnostic dump of every known record; failures here never affect the event
    async fn log_registry_snapshot(&self) {
        match self
            .bounded("list_devices", self.device_repository.list_devices())
            .await
        {
            Ok(records) => debug!(count = records.len(), records = ?records, "registry snapshot"),
            Err(e) => debug!(error = %e, "registry snapshot unavailable"),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = DomainResult<T>>,
    ) -> DomainResult<T> {
        match tokio::time::timeout(self.config.registry_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, "registry call timed out");
                Err(DomainError::RegistryTimeout(operation.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::domain::{
        CreateDeviceOutcome, CreateDeviceRepoInput, LifecyclePhase, MockDeviceRepository,
        MockEventRelay, PresentedToken, UpdateDeviceRepoInput,
    };
    use common::memory::InMemoryDeviceRepository;
    use serde_json::json;

    fn event(id: &str, event_type: EventType, payload: serde_json::Value) -> DeviceEvent {
        DeviceEvent {
            device_id: DeviceId::new(id),
            token: PresentedToken::from("42x5yz"),
            event_type,
            payload: payload.as_object().cloned().unwrap_or_default(),
        }
    }

    fn record(phase: LifecyclePhase, dispensed: u32, version: u64) -> DeviceRecord {
        DeviceRecord {
            device_id: DeviceId::new("1"),
            name: "Another Dispenser".to_string(),
            capacity: 20,
            dispensed,
            phase,
            version,
            created_at: None,
            updated_at: None,
        }
    }

    fn accepting_relay() -> MockEventRelay {
        let mut relay = MockEventRelay::new();
        relay.expect_publish().returning(|_| Ok(()));
        relay
    }

    fn dispatcher(repo: impl DeviceRepository + 'static, relay: MockEventRelay) -> EventDispatcher {
        EventDispatcher::new(Arc::new(repo), Arc::new(relay), DispatcherConfig::default())
    }

    #[tokio::test]
    async fn test_startup_creates_and_relays() {
        let mut repo = MockDeviceRepository::new();
        repo.expect_get_device().times(1).return_once(|_| Ok(None));
        repo.expect_create_device_if_absent()
            .withf(|input: &CreateDeviceRepoInput| {
                input.device_id == DeviceId::new("1") && input.capacity == 20
            })
            .times(1)
            .return_once(|_| {
                Ok(CreateDeviceOutcome {
                    device: record(LifecyclePhase::Active, 0, 1),
                    created: true,
                })
            });
        repo.expect_list_devices()
            .times(1)
            .return_once(|| Ok(vec![record(LifecyclePhase::Active, 0, 1)]));

        let mut relay = MockEventRelay::new();
        relay
            .expect_publish()
            .withf(|event: &OutboundEvent| {
                event.event_type == EventType::Startup && event.device.version == 1
            })
            .times(1)
            .return_once(|_| Ok(()));

        let result = dispatcher(repo, relay)
            .dispatch(&event("1", EventType::Startup, json!({})))
            .await
            .unwrap();

        assert_eq!(result.phase, LifecyclePhase::Active);
    }

    #[tokio::test]
    async fn test_rejected_event_is_not_relayed() {
        let mut repo = MockDeviceRepository::new();
        repo.expect_get_device().return_once(|_| Ok(None));
        repo.expect_update_device_if_match().never();

        let mut relay = MockEventRelay::new();
        relay.expect_publish().never();

        let result = dispatcher(repo, relay)
            .dispatch(&event("1", EventType::Dispense, json!({})))
            .await;

        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_version_conflict_is_retried() {
        let mut repo = MockDeviceRepository::new();
        let mut reads = 0;
        repo.expect_get_device().times(2).returning(move |_| {
            reads += 1;
            Ok(Some(record(LifecyclePhase::Active, reads, reads as u64)))
        });
        let mut writes = 0;
        repo.expect_update_device_if_match()
            .times(2)
            .returning(move |input: UpdateDeviceRepoInput| {
                writes += 1;
                if writes == 1 {
                    Err(DomainError::VersionConflict(input.device_id.to_string()))
                } else {
                    Ok(record(input.phase, input.dispensed, input.expected_version + 1))
                }
            });

        let result = dispatcher(repo, accepting_relay())
            .dispatch(&event("1", EventType::Dispense, json!({})))
            .await
            .unwrap();

        // second read saw dispensed = 2
        assert_eq!(result.dispensed, 3);
        assert_eq!(result.version, 3);
    }

    #[tokio::test]
    async fn test_version_conflict_retries_are_bounded() {
        let mut repo = MockDeviceRepository::new();
        repo.expect_get_device()
            .times(4)
            .returning(|_| Ok(Some(record(LifecyclePhase::Active, 0, 1))));
        repo.expect_update_device_if_match()
            .times(4)
            .returning(|input| Err(DomainError::VersionConflict(input.device_id.to_string())));

        let mut relay = MockEventRelay::new();
        relay.expect_publish().never();

        let result = dispatcher(repo, relay)
            .dispatch(&event("1", EventType::Dispense, json!({})))
            .await;

        assert!(matches!(result, Err(DomainError::VersionConflict(_))));
    }

    #[tokio::test]
    async fn test_relay_failure_does_not_fail_dispatch() {
        let mut repo = MockDeviceRepository::new();
        repo.expect_get_device()
            .return_once(|_| Ok(Some(record(LifecyclePhase::Active, 0, 1))));
        repo.expect_update_device_if_match()
            .return_once(|input| Ok(record(input.phase, input.dispensed, 2)));

        let mut relay = MockEventRelay::new();
        relay
            .expect_publish()
            .times(1)
            .return_once(|_| Err(DomainError::RelayUnavailable("queue full".to_string())));

        let result = dispatcher(repo, relay)
            .dispatch(&event("1", EventType::Empty, json!({})))
            .await
            .unwrap();

        assert_eq!(result.phase, LifecyclePhase::Empty);
    }

    #[tokio::test]
    async fn test_snapshot_failure_does_not_fail_startup() {
        let mut repo = MockDeviceRepository::new();
        repo.expect_get_device()
            .return_once(|_| Ok(Some(record(LifecyclePhase::Active, 2, 3))));
        repo.expect_list_devices()
            .return_once(|| Err(DomainError::RepositoryError(anyhow::anyhow!("db down"))));

        let result = dispatcher(repo, accepting_relay())
            .dispatch(&event("1", EventType::Startup, json!({})))
            .await
            .unwrap();

        assert_eq!(result.version, 3);
    }

    struct StalledRepository;

    #[async_trait]
    impl DeviceRepository for StalledRepository {
        async fn get_device(&self, _input: GetDeviceRepoInput) -> DomainResult<Option<DeviceRecord>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn create_device_if_absent(
            &self,
            _input: CreateDeviceRepoInput,
        ) -> DomainResult<CreateDeviceOutcome> {
            unreachable!("never reached past a stalled read")
        }

        async fn update_device_if_match(
            &self,
            _input: UpdateDeviceRepoInput,
        ) -> DomainResult<DeviceRecord> {
            unreachable!("never reached past a stalled read")
        }

        async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_stalled_registry_times_out() {
        let mut relay = MockEventRelay::new();
        relay.expect_publish().never();

        let dispatcher = EventDispatcher::new(
            Arc::new(StalledRepository),
            Arc::new(relay),
            DispatcherConfig {
                registry_timeout: Duration::from_millis(20),
                ..DispatcherConfig::default()
            },
        );

        let result = dispatcher
            .dispatch(&event("1", EventType::Startup, json!({})))
            .await;

        match result {
            Err(DomainError::RegistryTimeout(op)) => assert_eq!(op, "get_device"),
            other => panic!("Expected RegistryTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_dispenses_on_one_device_all_apply() {
        let repo = InMemoryDeviceRepository::new();
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(repo.clone()),
            Arc::new(accepting_relay()),
            DispatcherConfig {
                max_conflict_retries: 0,
                ..DispatcherConfig::default()
            },
        ));

        dispatcher
            .dispatch(&event("1", EventType::Startup, json!({})))
            .await
            .unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .dispatch(&event("1", EventType::Dispense, json!({})))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = repo
            .get_device(GetDeviceRepoInput {
                device_id: DeviceId::new("1"),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.dispensed, 10);
        assert_eq!(dispatcher.locks.len(), 0);
    }
}
