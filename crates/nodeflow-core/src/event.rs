//! Run lifecycle broadcast.
//!
//! For one run, subscribers see `RunStarted` first and `RunFinished` last.
//! A node's `NodeFinished` follows its `NodeStarted`. Branches of a fan-out
//! all start before any of them finishes.
//! `NodeSkipped` is sent once per pruned node, when it is pruned. A subscriber
//! that falls more than the channel capacity behind gets `Lagged` and misses
//! the overwritten events.

use tokio::sync::broadcast;

use crate::types::RunEvent;

/// Events buffered per subscriber by [`EventBus::default`].
pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`RunEvent`]s to any number of subscribers. Several runs may
/// share one bus; events carry their run id.
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Nobody listening is not an error.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunId;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::NodeSkipped {
            run_id: RunId::from_str("r1"),
            node_id: "n1".into(),
        });

        match rx.recv().await.unwrap() {
            RunEvent::NodeSkipped { node_id, .. } => assert_eq!(node_id, "n1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(4);
        bus.publish(RunEvent::NodeSkipped {
            run_id: RunId::from_str("r1"),
            node_id: "early".into(),
        });
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(RunEvent::RunStarted {
            run_id: RunId::new(),
            node_count: 0,
        });
    }
}
