// Test support utilities for both unit and integration tests

use crate::clock::Clock;
use crate::playback::{MediaBackend, MediaError, MediaEvent};
use crate::sync::{MemoryStore, SharedStore, StoreChange, StoreError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;

/// Clock that only moves when told to
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(start_ms),
        })
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Observable state of a `FakeMedia`
#[derive(Debug, Clone, Default)]
pub struct FakeMediaState {
    pub source: Option<String>,
    /// Every source ever set, in order
    pub loads: Vec<String>,
    pub playing: bool,
    pub position: f64,
    pub volume: f64,
    pub play_attempts: usize,
    pub autoplay_blocked: bool,
    pub broken_sources: HashSet<String>,
}

/// Scriptable media backend. Clones share state, so a test keeps one clone
/// to drive and inspect the backend owned by the controller.
#[derive(Clone, Default)]
pub struct FakeMedia {
    state: Arc<Mutex<FakeMediaState>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn MediaBackend> {
        Box::new(self.clone())
    }

    pub fn block_autoplay(&self, blocked: bool) {
        self.state.lock().unwrap().autoplay_blocked = blocked;
    }

    pub fn break_source(&self, uri: &str) {
        self.state
            .lock()
            .unwrap()
            .broken_sources
            .insert(uri.to_string());
    }

    /// Simulate playback progress
    pub fn set_position(&self, seconds: f64) {
        self.state.lock().unwrap().position = seconds;
    }

    pub fn state(&self) -> FakeMediaState {
        self.state.lock().unwrap().clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.state.lock().unwrap().loads.clone()
    }

    /// The event a real backend would raise once the current source settles
    pub fn load_outcome(&self, duration: f64) -> MediaEvent {
        let state = self.state.lock().unwrap();
        match &state.source {
            Some(source) if state.broken_sources.contains(source) => MediaEvent::LoadFailed {
                reason: format!("cannot decode {}", source),
            },
            _ => MediaEvent::MetadataLoaded { duration },
        }
    }
}

#[async_trait::async_trait]
impl MediaBackend for FakeMedia {
    fn set_source(&mut self, uri: &str) {
        let mut state = self.state.lock().unwrap();
        state.source = Some(uri.to_string());
        state.loads.push(uri.to_string());
        state.position = 0.0;
    }

    async fn play(&mut self) -> Result<(), MediaError> {
        let mut state = self.state.lock().unwrap();
        state.play_attempts += 1;
        if state.autoplay_blocked {
            return Err(MediaError::AutoplayBlocked);
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().unwrap().playing = false;
    }

    fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    fn set_position(&mut self, seconds: f64) {
        self.state.lock().unwrap().position = seconds;
    }

    fn set_volume(&mut self, volume: f64) {
        self.state.lock().unwrap().volume = volume;
    }
}

/// Memory store whose writes can be made to fail, and whose change
/// notifications can be dropped the way a backgrounded context misses them
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Arc<AtomicBool>,
    asleep: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(false)),
            asleep: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// While asleep, changes from other contexts are discarded
    pub fn set_asleep(&self, asleep: bool) {
        self.asleep.store(asleep, Ordering::SeqCst);
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SharedStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.remove(key).await
    }

    /// Must be called inside a tokio runtime
    fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<StoreChange> {
        let mut inner_rx = self.inner.subscribe();
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let asleep = self.asleep.clone();

        tokio::spawn(async move {
            while let Some(change) = inner_rx.recv().await {
                if asleep.load(Ordering::SeqCst) {
                    continue;
                }
                if tx.send(change).is_err() {
                    break;
                }
            }
        });
        rx
    }
}
