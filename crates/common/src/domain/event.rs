use crate::domain::{DeviceId, DeviceRecord, DomainError, DomainResult, MAX_CAPACITY};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle events a dispenser may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Startup,
    Dispense,
    Refill,
    Refilled,
    Empty,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Startup,
        EventType::Dispense,
        EventType::Refill,
        EventType::Refilled,
        EventType::Empty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Startup => "STARTUP",
            EventType::Dispense => "DISPENSE",
            EventType::Refill => "REFILL",
            EventType::Refilled => "REFILLED",
            EventType::Empty => "EMPTY",
        }
    }

    /// Subject token used when relaying, e.g. `dispenser_events.dispense`
    pub fn subject_token(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = DomainError;

    /// Matching is exact: `startup` is not a legal type
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| DomainError::IllegalType(s.to_string()))
    }
}

/// The `token` field as a device sent it.
/// Only text can match a stored credential.
#[derive(Clone, PartialEq, Eq)]
pub enum PresentedToken {
    Text(String),
    /// Present but not a string, e.g. `12345`
    NonText,
}

impl PresentedToken {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PresentedToken::Text(token) => Some(token),
            PresentedToken::NonText => None,
        }
    }
}

impl From<&str> for PresentedToken {
    fn from(token: &str) -> Self {
        PresentedToken::Text(token.to_string())
    }
}

impl fmt::Debug for PresentedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresentedToken::Text(_) => f.write_str("Text(<redacted>)"),
            PresentedToken::NonText => f.write_str("NonText"),
        }
    }
}

/// An event that passed structural validation
#[derive(Clone, PartialEq)]
pub struct DeviceEvent {
    pub device_id: DeviceId,
    pub token: PresentedToken,
    pub event_type: EventType,
    /// Every field other than `id`, `token` and `type`
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvent")
            .field("device_id", &self.device_id)
            .field("token", &"<redacted>")
            .field("event_type", &self.event_type)
            .field("payload", &self.payload)
            .finish()
    }
}

impl DeviceEvent {
    /// Items reported by a DISPENSE; defaults to one
    pub fn dispense_quantity(&self) -> DomainResult<u32> {
        match self.payload.get("quantity") {
            None | Some(serde_json::Value::Null) => Ok(1),
            Some(value) => positive_u32(value).ok_or_else(|| {
                DomainError::InvalidPayload("quantity must be a positive integer".to_string())
            }),
        }
    }

    /// Capacity announced on STARTUP, if any. Bounded by [`MAX_CAPACITY`].
    pub fn announced_capacity(&self) -> DomainResult<Option<u32>> {
        match self.payload.get("capacity") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => positive_u32(value)
                .filter(|capacity| *capacity <= MAX_CAPACITY)
                .map(Some)
                .ok_or_else(|| {
                    DomainError::InvalidPayload(format!(
                        "capacity must be an integer between 1 and {}",
                        MAX_CAPACITY
                    ))
                }),
        }
    }

    /// Display name announced on STARTUP, if any
    pub fn announced_name(&self) -> Option<&str> {
        self.payload
            .get("name")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

fn positive_u32(value: &serde_json::Value) -> Option<u32> {
    value
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
}

/// What downstream consumers receive for an accepted event.
/// The device token is never forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub device_id: DeviceId,
    pub event_type: EventType,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub device: DeviceRecord,
    pub accepted_at: DateTime<Utc>,
}

impl OutboundEvent {
    pub fn accepted(event: &DeviceEvent, device: DeviceRecord) -> Self {
        Self {
            device_id: event.device_id.clone(),
            event_type: event.event_type,
            payload: event.payload.clone(),
            device,
            accepted_at: Utc::now(),
        }
    }
}

/// Best-effort hand-off of accepted events toward downstream consumers.
/// Implementations must return without waiting on delivery.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait EventRelay: Send + Sync {
    fn publish(&self, event: OutboundEvent) -> DomainResult<()>;
}

/// Sink that actually delivers relayed events (message bus, log, ...)
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboundEvent) -> DomainResult<()>;
}
