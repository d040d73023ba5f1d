use crate::domain::{CredentialStore, DeviceCredential, DeviceId, DomainError, DomainResult};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

/// PostgreSQL-backed credential table
#[derive(Clone)]
pub struct PostgresCredentialStore {
    client: PostgresClient,
}

impl PostgresCredentialStore {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self), fields(device_id = %device_id))]
    async fn get_token(&self, device_id: &DeviceId) -> DomainResult<Option<String>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT token FROM device_credentials WHERE device_id = $1",
                &[&device_id.as_str()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|row| row.get(0)))
    }

    #[instrument(skip(self, credential), fields(device_id = %credential.device_id))]
    async fn upsert_credential(&self, credential: DeviceCredential) -> DomainResult<()> {
        crate::garde::validate_struct(&credential)?;

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.execute(
            "INSERT INTO device_credentials (device_id, token, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (device_id) DO UPDATE SET token = EXCLUDED.token, updated_at = EXCLUDED.updated_at",
            &[&credential.device_id.as_str(), &credential.token, &Utc::now()],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!("stored device credential");
        Ok(())
    }
}
