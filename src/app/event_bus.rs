//! Internal event bus carrying typed domain events.
//!
//! A thin wrapper over a tokio broadcast channel: ingestion publishes,
//! the lifecycle manager (and anything else) subscribes. Publishing
//! with no live subscriber is reported but not fatal.

use tokio::sync::broadcast;

use crate::domain::TreasuryEvent;

/// Broadcast bus for domain events
pub struct EventBus {
    sender: broadcast::Sender<TreasuryEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// New subscription receiving every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TreasuryEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn publish(
        &self,
        event: TreasuryEvent,
    ) -> Result<usize, broadcast::error::SendError<TreasuryEvent>> {
        self.sender.send(event)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventMeta;
    use chrono::Utc;

    fn pause_event() -> TreasuryEvent {
        TreasuryEvent::Paused {
            meta: EventMeta {
                block_number: 5,
                tx_hash: "tx".to_string(),
                timestamp: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(pause_event()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "treasury.paused");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(pause_event()).unwrap();

        assert_eq!(rx1.recv().await.unwrap().name(), "treasury.paused");
        assert_eq!(rx2.recv().await.unwrap().name(), "treasury.paused");
    }

    #[test]
    fn test_publish_without_subscribers_errors() {
        let bus = EventBus::new(8);
        assert!(bus.publish(pause_event()).is_err());
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_channel() {
        let bus = EventBus::new(8);
        let cloned = bus.clone();
        let mut rx = bus.subscribe();

        cloned.publish(pause_event()).unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "treasury.paused");
        assert_eq!(cloned.subscriber_count(), 1);
    }
}
