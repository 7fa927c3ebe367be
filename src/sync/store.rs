use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::trace;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Write rejected for key {key}: {reason}")]
    WriteRejected { key: String, reason: String },
}

/// A change made by another context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    /// None when the key was removed
    pub new_value: Option<String>,
}

/// Durable key-value slot shared by every context of one site, plus change
/// notification. Each instance represents one context: writes made through
/// it are announced to every other context's subscribers, never its own.
#[async_trait::async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscription ends when the receiver is dropped
    fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<StoreChange>;
}

struct Listener {
    context: Uuid,
    tx: tokio_mpsc::UnboundedSender<StoreChange>,
}

#[derive(Default)]
struct MemoryArea {
    values: Mutex<HashMap<String, String>>,
    listeners: Mutex<Vec<Listener>>,
}

impl MemoryArea {
    fn notify(&self, from: Uuid, change: StoreChange) {
        let mut listeners = self.listeners.lock().unwrap();
        // Closed receivers are pruned as we go
        listeners.retain(|listener| {
            if listener.context == from {
                return !listener.tx.is_closed();
            }
            listener.tx.send(change.clone()).is_ok()
        });
    }
}

/// In-process shared store. `new()` creates a fresh storage area and its
/// first context; `connect_peer()` opens another context on the same area,
/// the way a second tab sees the same origin storage.
#[derive(Clone)]
pub struct MemoryStore {
    context: Uuid,
    area: Arc<MemoryArea>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            context: Uuid::new_v4(),
            area: Arc::new(MemoryArea::default()),
        }
    }

    pub fn connect_peer(&self) -> Self {
        Self {
            context: Uuid::new_v4(),
            area: self.area.clone(),
        }
    }

    pub fn context_id(&self) -> Uuid {
        self.context
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("context", &self.context)
            .finish()
    }
}

#[async_trait::async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.area.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let previous = self
            .area
            .values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());

        // Rewriting an identical value is not a change
        if previous.as_deref() != Some(value) {
            trace!("MemoryStore: {} updated by context {}", key, self.context);
            self.area.notify(
                self.context,
                StoreChange {
                    key: key.to_string(),
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let previous = self.area.values.lock().unwrap().remove(key);
        if previous.is_some() {
            self.area.notify(
                self.context,
                StoreChange {
                    key: key.to_string(),
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<StoreChange> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        self.area.listeners.lock().unwrap().push(Listener {
            context: self.context,
            tx,
        });
        rx
    }
}
