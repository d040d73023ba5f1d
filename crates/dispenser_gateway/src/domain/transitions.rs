use common::domain::{
    CreateDeviceRepoInput, DeviceEvent, DeviceRecord, DomainError, DomainResult, EventType,
    LifecyclePhase, UpdateDeviceRepoInput,
};

/// Values given to a device that does not announce its own on STARTUP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDefaults {
    pub name: String,
    pub capacity: u32,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            name: "Another Dispenser".to_string(),
            capacity: 20,
        }
    }
}

/// What the registry must do to apply an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Create(CreateDeviceRepoInput),
    Update(UpdateDeviceRepoInput),
    /// Accepted without changing the record
    Unchanged(DeviceRecord),
}

/// Decide the effect of `event` on the current record (`None` when the device is unknown).
///
/// | Type     | Accepted from          | Effect                                           |
/// |----------|------------------------|--------------------------------------------------|
/// | STARTUP  | Unknown                | create, ACTIVE, nothing dispensed                |
/// | STARTUP  | any known state        | no change                                        |
/// | DISPENSE | ACTIVE, NEEDS_REFILL   | add quantity; EMPTY once capacity is reached     |
/// | REFILL   | ACTIVE, EMPTY          | NEEDS_REFILL                                     |
/// | REFILLED | NEEDS_REFILL, EMPTY    | ACTIVE, dispensed reset to zero                  |
/// | EMPTY    | ACTIVE, NEEDS_REFILL   | EMPTY                                            |
pub fn plan_transition(
    current: Option<&DeviceRecord>,
    event: &DeviceEvent,
    defaults: &DeviceDefaults,
) -> DomainResult<Transition> {
    use LifecyclePhase::*;

    let Some(record) = current else {
        return match event.event_type {
            EventType::Startup => Ok(Transition::Create(CreateDeviceRepoInput {
                device_id: event.device_id.clone(),
                name: event
                    .announced_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| defaults.name.clone()),
                capacity: event.announced_capacity()?.unwrap_or(defaults.capacity),
            })),
            _ => Err(rejected(event, "UNKNOWN")),
        };
    };

    match (event.event_type, record.phase) {
        (EventType::Startup, _) => Ok(Transition::Unchanged(record.clone())),

        (EventType::Dispense, Active | NeedsRefill) => {
            let requested = event.dispense_quantity()?;
            let remaining = record.remaining();
            if requested > remaining {
                return Err(DomainError::OverCapacity {
                    device_id: record.device_id.to_string(),
                    requested,
                    remaining,
                });
            }
            let dispensed = record.dispensed + requested;
            let phase = if dispensed == record.capacity {
                Empty
            } else {
                record.phase
            };
            Ok(update(record, dispensed, phase))
        }

        (EventType::Refill, Active | Empty) => Ok(update(record, record.dispensed, NeedsRefill)),

        (EventType::Refilled, NeedsRefill | Empty) => Ok(update(record, 0, Active)),

        (EventType::Empty, Active | NeedsRefill) => Ok(update(record, record.dispensed, Empty)),

        (_, phase) => Err(rejected(event, phase.as_str())),
    }
}

fn update(record: &DeviceRecord, dispensed: u32, phase: LifecyclePhase) -> Transition {
    Transition::Update(UpdateDeviceRepoInput {
        device_id: record.device_id.clone(),
        expected_version: record.version,
        dispensed,
        phase,
    })
}

fn rejected(event: &DeviceEvent, state: &str) -> DomainError {
    DomainError::InvalidTransition {
        device_id: event.device_id.to_string(),
        event_type: event.event_type.to_string(),
        state: state.to_string(),
    }
}
