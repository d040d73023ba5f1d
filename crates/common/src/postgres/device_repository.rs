use crate::domain::{
    CreateDeviceOutcome, CreateDeviceRepoInput, DeviceId, DeviceRecord, DeviceRepository,
    DomainError, DomainResult, GetDeviceRepoInput, LifecyclePhase, UpdateDeviceRepoInput,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

const DEVICE_COLUMNS: &str =
    "device_id, name, capacity, dispensed, phase, version, created_at, updated_at";

/// Dispenser row as stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub device_id: String,
    pub name: String,
    pub capacity: i32,
    pub dispensed: i32,
    pub phase: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&tokio_postgres::Row> for DeviceRow {
    fn from(row: &tokio_postgres::Row) -> Self {
        DeviceRow {
            device_id: row.get(0),
            name: row.get(1),
            capacity: row.get(2),
            dispensed: row.get(3),
            phase: row.get(4),
            version: row.get(5),
            created_at: row.get(6),
            updated_at: row.get(7),
        }
    }
}

/// Convert database DeviceRow to domain DeviceRecord
impl TryFrom<DeviceRow> for DeviceRecord {
    type Error = DomainError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(DeviceRecord {
            device_id: DeviceId::new(row.device_id),
            name: row.name,
            capacity: u32::try_from(row.capacity).map_err(|e| DomainError::RepositoryError(e.into()))?,
            dispensed: u32::try_from(row.dispensed).map_err(|e| DomainError::RepositoryError(e.into()))?,
            phase: row.phase.parse::<LifecyclePhase>()?,
            version: u64::try_from(row.version).map_err(|e| DomainError::RepositoryError(e.into()))?,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

fn to_record(row: &tokio_postgres::Row) -> DomainResult<DeviceRecord> {
    DeviceRow::from(row).try_into()
}

fn to_i32(value: u32) -> DomainResult<i32> {
    i32::try_from(value).map_err(|e| DomainError::RepositoryError(e.into()))
}

/// PostgreSQL implementation of DeviceRepository trait
#[derive(Clone)]
pub struct PostgresDeviceRepository {
    client: PostgresClient,
}

impl PostgresDeviceRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceRepository for PostgresDeviceRepository {
    #[instrument(skip(self, input), fields(device_id = %input.device_id))]
    async fn get_device(&self, input: GetDeviceRepoInput) -> DomainResult<Option<DeviceRecord>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!("SELECT {} FROM dispensers WHERE device_id = $1", DEVICE_COLUMNS),
                &[&input.device_id.as_str()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref().map(to_record).transpose()
    }

    #[instrument(skip(self, input), fields(device_id = %input.device_id))]
    async fn create_device_if_absent(
        &self,
        input: CreateDeviceRepoInput,
    ) -> DomainResult<CreateDeviceOutcome> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let now = Utc::now();
        let capacity = to_i32(input.capacity)?;

        // ON CONFLICT makes insert-if-absent a single statement
        let inserted = conn
            .query_opt(
                &format!(
                    "INSERT INTO dispensers ({}) VALUES ($1, $2, $3, 0, $4, 0, $5, $5)
                     ON CONFLICT (device_id) DO NOTHING
                     RETURNING {}",
                    DEVICE_COLUMNS, DEVICE_COLUMNS
                ),
                &[
                    &input.device_id.as_str(),
                    &input.name,
                    &capacity,
                    &LifecyclePhase::Active.as_str(),
                    &now,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if let Some(row) = inserted {
            debug!("registered device: {}", input.device_id);
            return Ok(CreateDeviceOutcome {
                device: to_record(&row)?,
                created: true,
            });
        }

        let existing = conn
            .query_one(
                &format!("SELECT {} FROM dispensers WHERE device_id = $1", DEVICE_COLUMNS),
                &[&input.device_id.as_str()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(CreateDeviceOutcome {
            device: to_record(&existing)?,
            created: false,
        })
    }

    #[instrument(skip(self, input), fields(device_id = %input.device_id, expected_version = input.expected_version))]
    async fn update_device_if_match(
        &self,
        input: UpdateDeviceRepoInput,
    ) -> DomainResult<DeviceRecord> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let expected_version = i64::try_from(input.expected_version)
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        let dispensed = to_i32(input.dispensed)?;

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE dispensers
                     SET dispensed = $3, phase = $4, version = version + 1, updated_at = $5
                     WHERE device_id = $1 AND version = $2
                     RETURNING {}",
                    DEVICE_COLUMNS
                ),
                &[
                    &input.device_id.as_str(),
                    &expected_version,
                    &dispensed,
                    &input.phase.as_str(),
                    &Utc::now(),
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        match row {
            Some(row) => to_record(&row),
            None => Err(DomainError::VersionConflict(input.device_id.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM dispensers ORDER BY created_at ASC, device_id ASC",
                    DEVICE_COLUMNS
                ),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!("found {} devices", rows.len());

        rows.iter().map(to_record).collect()
    }
}
