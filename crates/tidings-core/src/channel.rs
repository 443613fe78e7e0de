use tokio::sync::broadcast;

use crate::types::SyncEvent;

/// Broadcast event stream type used by presentation subscribers.
pub type EventStream = broadcast::Receiver<SyncEvent>;

/// Fan-out of [`SyncEvent`]s to presentation code.
#[derive(Clone, Debug)]
pub struct EventBus {
    event_tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
