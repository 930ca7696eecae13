//! In-process fan-out of store notifications.
//!
//! A tokio broadcast channel: the store publishes, and each pipeline
//! consumer (replicator, size tracker, size-delta metric) holds its own
//! receiver, so one mutation is delivered to every consumer independently.

use crate::models::event::StoreEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Deliver an event to every current subscriber.
    pub fn publish(&self, event: StoreEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            debug!(bucket = %event.bucket, key = %event.key, "no subscribers for store event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
