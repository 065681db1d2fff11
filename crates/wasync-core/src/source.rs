use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::events::ProtocolEvent;

/// Per-session event source fed by the protocol transport.
///
/// Every subscriber owns an unbounded queue, so a slow consumer never loses
/// events and never blocks the publisher. Subscribers whose receiver has
/// been dropped are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventSource {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ProtocolEvent>>>>,
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn publish(&self, event: ProtocolEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProtocolEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}
