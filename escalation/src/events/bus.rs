//! Event bus for escalation observers
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and
//! never fails; slow subscribers lag and drop the oldest events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::EscalationEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<EscalationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers; returns how many received it.
    pub fn publish(&self, event: EscalationEvent) -> usize {
        let event_type = event.event_type();
        let task_id = event.task_id().to_string();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, task_id, receivers = count, "Event published");
                count
            }
            // No receivers is fine
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
