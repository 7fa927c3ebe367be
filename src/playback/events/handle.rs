use super::TransportEvent;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::trace;

type SubscriptionId = u64;

struct Subscription {
    tx: tokio_mpsc::UnboundedSender<TransportEvent>,
}

/// Fan-out of transport events to any number of subscribers.
///
/// Dispatch happens inline on `publish`, so every subscriber sees events in
/// the order the controller produced them.
#[derive(Clone, Default)]
pub struct TransportEventHandle {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl TransportEventHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send an event to every live subscriber
    pub fn publish(&self, event: TransportEvent) {
        let mut subs = self.subscriptions.lock().unwrap();
        let mut to_remove = Vec::new();

        for (id, subscription) in subs.iter() {
            // If send fails, receiver was dropped - mark for removal
            if subscription.tx.send(event.clone()).is_err() {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            trace!("Dropping closed transport subscription {}", id);
            subs.remove(&id);
        }
    }

    /// Subscribe to all transport events.
    /// Subscription is automatically removed when receiver is dropped
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, Subscription { tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }
}
