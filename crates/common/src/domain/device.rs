use crate::domain::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier a dispenser assigns to itself
///
/// Devices report either an integer or a string; both are normalized to the
/// textual form so `1` and `"1"` address the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Normalize an `id` field from the wire.
    ///
    /// Returns `None` only when the field counts as absent (see [`is_present`]).
    /// Integral numbers, including `1.0`, normalize to their integer text; any
    /// other present value keeps its JSON text and simply matches no credential.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        if !is_present(value) {
            return None;
        }
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => i.to_string(),
                (None, Some(u), _) => u.to_string(),
                (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                    format!("{}", f as i64)
                }
                _ => n.to_string(),
            },
            other => other.to_string(),
        };
        Some(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Largest capacity a device may announce; the storage column is a signed 32-bit integer
pub const MAX_CAPACITY: u32 = i32::MAX as u32;

/// Whether a wire field counts as supplied.
/// `null`, `false`, `0`, `""`, `[]` and `{}` are treated as absent.
pub fn is_present(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(false) => false,
        serde_json::Value::Bool(true) => true,
        serde_json::Value::Number(n) => n.as_f64() != Some(0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
    }
}

/// Lifecycle phase of a known device. "Unknown" is represented by the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    Active,
    NeedsRefill,
    Empty,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Active => "ACTIVE",
            LifecyclePhase::NeedsRefill => "NEEDS_REFILL",
            LifecyclePhase::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecyclePhase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(LifecyclePhase::Active),
            "NEEDS_REFILL" => Ok(LifecyclePhase::NeedsRefill),
            "EMPTY" => Ok(LifecyclePhase::Empty),
            other => Err(DomainError::RepositoryError(anyhow::anyhow!(
                "unknown lifecycle phase stored: {}",
                other
            ))),
        }
    }
}

/// The gateway's model of one dispenser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub name: String,
    pub capacity: u32,
    pub dispensed: u32,
    pub phase: LifecyclePhase,
    /// Bumped on every committed update; used for compare-and-set
    pub version: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.dispensed)
    }
}

/// Repository input for registering a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDeviceRepoInput {
    pub device_id: DeviceId,
    pub name: String,
    pub capacity: u32,
}

/// Repository input for retrieving a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDeviceRepoInput {
    pub device_id: DeviceId,
}

/// Repository input for a compare-and-set update of the mutable fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDeviceRepoInput {
    pub device_id: DeviceId,
    pub expected_version: u64,
    pub dispensed: u32,
    pub phase: LifecyclePhase,
}

/// Result of an insert-if-absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDeviceOutcome {
    pub device: DeviceRecord,
    /// False when a record with the same id already existed and was returned instead
    pub created: bool,
}

/// Repository trait for device record storage
/// Infrastructure (in-memory, PostgreSQL) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Get a device by ID
    async fn get_device(&self, input: GetDeviceRepoInput) -> DomainResult<Option<DeviceRecord>>;

    /// Create the device unless one with the same id exists, as a single atomic step.
    /// New records start ACTIVE with nothing dispensed.
    async fn create_device_if_absent(
        &self,
        input: CreateDeviceRepoInput,
    ) -> DomainResult<CreateDeviceOutcome>;

    /// Store new mutable fields only if the stored version equals `expected_version`.
    /// Returns `VersionConflict` otherwise.
    async fn update_device_if_match(&self, input: UpdateDeviceRepoInput)
        -> DomainResult<DeviceRecord>;

    /// List every known device
    async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>>;
}
