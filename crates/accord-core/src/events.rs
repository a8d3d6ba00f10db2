use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out of typed events to any number of subscribers
pub struct EventBroadcaster<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + std::fmt::Debug> EventBroadcaster<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBroadcaster { sender }
    }

    /// Publish an event to all current subscribers
    pub fn emit(&self, event: E) {
        match self.sender.send(event) {
            Ok(count) => trace!("Event delivered to {} subscribers", count),
            Err(_) => {
                // No subscribers
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + std::fmt::Debug> Default for EventBroadcaster<E> {
    fn default() -> Self {
        Self::new(1024)
    }
}
