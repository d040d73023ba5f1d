use crate::domain::{CredentialStore, DeviceCredential, DeviceId, DomainResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory credential table, seeded at startup
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    tokens: Arc<RwLock<HashMap<DeviceId, String>>>,
}

impl InMemoryCredentialStore {
    pub fn new(credentials: Vec<DeviceCredential>) -> Self {
        let tokens = credentials
            .into_iter()
            .map(|credential| (credential.device_id, credential.token))
            .collect();
        Self {
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_token(&self, device_id: &DeviceId) -> DomainResult<Option<String>> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(device_id).cloned())
    }

    async fn upsert_credential(&self, credential: DeviceCredential) -> DomainResult<()> {
        crate::garde::validate_struct(&credential)?;
        let mut tokens = self.tokens.write().await;
        debug!(device_id = %credential.device_id, "storing device credential");
        tokens.insert(credential.device_id, credential.token);
        Ok(())
    }
}
