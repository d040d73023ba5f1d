use crate::domain::{
    CreateDeviceOutcome, CreateDeviceRepoInput, DeviceId, DeviceRecord, DeviceRepository,
    DomainError, DomainResult, GetDeviceRepoInput, LifecyclePhase, UpdateDeviceRepoInput,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory implementation of DeviceRepository using HashMap
#[derive(Clone, Default)]
pub struct InMemoryDeviceRepository {
    devices: Arc<RwLock<HashMap<DeviceId, DeviceRecord>>>,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn get_device(&self, input: GetDeviceRepoInput) -> DomainResult<Option<DeviceRecord>> {
        let devices = self.devices.read().await;
        Ok(devices.get(&input.device_id).cloned())
    }

    async fn create_device_if_absent(
        &self,
        input: CreateDeviceRepoInput,
    ) -> DomainResult<CreateDeviceOutcome> {
        // Check and insert under one write guard
        let mut devices = self.devices.write().await;
        if let Some(existing) = devices.get(&input.device_id) {
            return Ok(CreateDeviceOutcome {
                device: existing.clone(),
                created: false,
            });
        }

        let now = Utc::now();
        let device = DeviceRecord {
            device_id: input.device_id.clone(),
            name: input.name,
            capacity: input.capacity,
            dispensed: 0,
            phase: LifecyclePhase::Active,
            version: 0,
            created_at: Some(now),
            updated_at: Some(now),
        };
        devices.insert(input.device_id, device.clone());

        debug!(device_id = %device.device_id, "registered device");
        Ok(CreateDeviceOutcome {
            device,
            created: true,
        })
    }

    async fn update_device_if_match(
        &self,
        input: UpdateDeviceRepoInput,
    ) -> DomainResult<DeviceRecord> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&input.device_id)
            .filter(|device| device.version == input.expected_version)
            .ok_or_else(|| DomainError::VersionConflict(input.device_id.to_string()))?;

        if input.dispensed > device.capacity {
            return Err(DomainError::RepositoryError(anyhow::anyhow!(
                "dispensed count {} exceeds capacity {}",
                input.dispensed,
                device.capacity
            )));
        }

        device.dispensed = input.dispensed;
        device.phase = input.phase;
        device.version += 1;
        device.updated_at = Some(Utc::now());
        Ok(device.clone())
    }

    async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>> {
        let devices = self.devices.read().await;
        let mut listed: Vec<DeviceRecord> = devices.values().cloned().collect();
        listed.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_input(id: &str) -> CreateDeviceRepoInput {
        CreateDeviceRepoInput {
            device_id: DeviceId::new(id),
            name: "Another Dispenser".to_string(),
            capacity: 20,
        }
    }

    #[tokio::test]
    async fn test_create_device_if_absent_creates_once() {
        let repo = InMemoryDeviceRepository::new();

        let first = repo.create_device_if_absent(create_input("1")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.device.dispensed, 0);
        assert_eq!(first.device.phase, LifecyclePhase::Active);

        let second = repo.create_device_if_absent(create_input("1")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.device, first.device);
        assert_eq!(repo.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_record() {
        let repo = InMemoryDeviceRepository::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.create_device_if_absent(create_input("9")).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(repo.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_device_if_match_bumps_version() {
        let repo = InMemoryDeviceRepository::new();
        repo.create_device_if_absent(create_input("1")).await.unwrap();

        let updated = repo
            .update_device_if_match(UpdateDeviceRepoInput {
                device_id: DeviceId::new("1"),
                expected_version: 0,
                dispensed: 4,
                phase: LifecyclePhase::Active,
            })
            .await
            .unwrap();

        assert_eq!(updated.dispensed, 4);
        assert_eq!(updated.version, 1);
    }

    #[tokio::test]
    async fn test_update_device_if_match_rejects_stale_version() {
        let repo = InMemoryDeviceRepository::new();
        repo.create_device_if_absent(create_input("1")).await.unwrap();

        let result = repo
            .update_device_if_match(UpdateDeviceRepoInput {
                device_id: DeviceId::new("1"),
                expected_version: 7,
                dispensed: 4,
                phase: LifecyclePhase::Active,
            })
            .await;

        assert!(matches!(result, Err(DomainError::VersionConflict(_))));
        let stored = repo
            .get_device(GetDeviceRepoInput {
                device_id: DeviceId::new("1"),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.dispensed, 0);
    }

    #[tokio::test]
    async fn test_update_unknown_device_is_conflict() {
        let repo = InMemoryDeviceRepository::new();
        let result = repo
            .update_device_if_match(UpdateDeviceRepoInput {
                device_id: DeviceId::new("404"),
                expected_version: 0,
                dispensed: 1,
                phase: LifecyclePhase::Active,
            })
            .await;
        assert!(matches!(result, Err(DomainError::VersionConflict(_))));
    }
}
