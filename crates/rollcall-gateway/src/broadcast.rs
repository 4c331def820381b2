use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

/// Fan-out of JSON events to every `/events` subscriber.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
    seq: Arc<AtomicU64>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// New client subscribes to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Wrap `payload` in an envelope and push it to all subscribers.
    /// Silently drops if no subscribers exist.
    pub fn publish<T: Serialize>(&self, event: &str, payload: &T, recipients: usize) {
        let envelope = serde_json::json!({
            "event": event,
            "seq": self.seq.fetch_add(1, Ordering::Relaxed),
            "recipients": recipients,
            "payload": payload,
        });
        let _ = self.tx.send(envelope.to_string());
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
