use crate::domain::{DeviceId, DomainError, DomainResult};
use async_trait::async_trait;
use garde::Validate;
use std::fmt;

/// Static mapping from a device to the token it presents
#[derive(Clone, PartialEq, Eq, Validate)]
pub struct DeviceCredential {
    #[garde(skip)]
    pub device_id: DeviceId,
    #[garde(length(min = 1))]
    pub token: String,
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("device_id", &self.device_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl DeviceCredential {
    pub fn new(device_id: DeviceId, token: impl Into<String>) -> Self {
        Self {
            device_id,
            token: token.into(),
        }
    }

    /// Parse a comma-separated list of `id:token` pairs, e.g. `1:42x5yz,2:abc`
    pub fn parse_list(entries: &str) -> DomainResult<Vec<Self>> {
        entries
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (id, token) = entry.split_once(':').ok_or_else(|| {
                    DomainError::ValidationError("credential entry must be id:token".to_string())
                })?;
                let device_id = DeviceId::from_json(&serde_json::Value::String(id.trim().to_string()))
                    .ok_or_else(|| {
                        DomainError::ValidationError("credential entry has empty id".to_string())
                    })?;
                let credential = DeviceCredential::new(device_id, token.trim());
                crate::garde::validate_struct(&credential)?;
                Ok(credential)
            })
            .collect()
    }
}

/// Lookup of expected device tokens
/// Read-mostly; writes come only from the administrative path
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Expected token for a device, if it has one
    async fn get_token(&self, device_id: &DeviceId) -> DomainResult<Option<String>>;

    /// Insert or replace a device credential
    async fn upsert_credential(&self, credential: DeviceCredential) -> DomainResult<()>;
}
