//! In-process event fan-out over a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::CommerceEvent;
use crate::domain::ports::{EventPublisher, EventPublisherError};

/// Default buffer size; slow subscribers past this lag and skip events.
pub const DEFAULT_CAPACITY: usize = 1_024;

/// [`EventPublisher`] that fans events out to every live subscriber.
#[derive(Clone)]
pub struct BroadcastEventPublisher {
    tx: broadcast::Sender<CommerceEvent>,
}

impl BroadcastEventPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CommerceEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: &CommerceEvent) -> Result<(), EventPublisherError> {
        match self.tx.send(event.clone()) {
            Ok(receivers) => {
                debug!(kind = event.kind(), event_id = %event.event_id(), receivers, "event published");
            }
            Err(_) => {
                debug!(kind = event.kind(), event_id = %event.event_id(), "no subscribers for event");
            }
        }
        Ok(())
    }
}
