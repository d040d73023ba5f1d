use common::domain::{DomainError, DomainResult, EventRelay, OutboundEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Create a bounded relay queue. The receiver side is meant for a [`crate::relay::RelayWorker`].
pub fn relay_channel(capacity: usize) -> (ChannelEventRelay, mpsc::Receiver<OutboundEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelEventRelay { sender }, receiver)
}

/// Enqueues accepted events without waiting for delivery
#[derive(Clone)]
pub struct ChannelEventRelay {
    sender: mpsc::Sender<OutboundEvent>,
}

impl EventRelay for ChannelEventRelay {
    fn publish(&self, event: OutboundEvent) -> DomainResult<()> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DomainError::RelayUnavailable("relay queue is full".to_string()),
            TrySendError::Closed(_) => {
                DomainError::RelayUnavailable("relay queue is closed".to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DeviceId, DeviceRecord, EventType, LifecyclePhase};

    fn outbound() -> OutboundEvent {
        OutboundEvent {
            device_id: DeviceId::new("1"),
            event_type: EventType::Dispense,
            payload: serde_json::Map::new(),
            device: DeviceRecord {
                device_id: DeviceId::new("1"),
                name: "Another Dispenser".to_string(),
                capacity: 20,
                dispensed: 1,
                phase: LifecyclePhase::Active,
                version: 2,
                created_at: None,
                updated_at: None,
            },
            accepted_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_enqueues() {
        let (relay, mut receiver) = relay_channel(4);
        relay.publish(outbound()).unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.device.version, 2);
    }

    #[test]
    fn test_full_queue_is_unavailable() {
        let (relay, _receiver) = relay_channel(1);
        relay.publish(outbound()).unwrap();

        let result = relay.publish(outbound());
        assert!(matches!(result, Err(DomainError::RelayUnavailable(_))));
    }

    #[test]
    fn test_closed_queue_is_unavailable() {
        let (relay, receiver) = relay_channel(1);
        drop(receiver);

        let result = relay.publish(outbound());
        assert!(matches!(result, Err(DomainError::RelayUnavailable(_))));
    }
}
