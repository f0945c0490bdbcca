use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// In-process event bus over `tokio::sync::broadcast`.
///
/// Publishing with no live subscribers is not an error: the core does not
/// depend on its downstream consumers being up.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let _ = self.tx.send(event);
        Ok(())
    }
}
