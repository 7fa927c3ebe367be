use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::playback::{
    ChangeOrigin, SharedController, TransportEvent, TransportEventKind, TransportState,
};
use crate::sync::snapshot::PlaybackSnapshot;
use crate::sync::store::{SharedStore, StoreChange, StoreError};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a sync channel. `Starting` only guards `start()` against a
/// concurrent second call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Stopped,
    Starting,
    Running,
}

struct ChannelInner {
    store: Arc<dyn SharedStore>,
    config: SyncConfig,
    clock: SharedClock,
    state: Mutex<ChannelState>,
    controller: Mutex<Option<SharedController>>,
}

/// Bridges one `AudioController` to the shared store: local changes are
/// written as snapshots, snapshots written by other contexts are applied.
///
/// This is the only place that knows the store key and the wire format.
pub struct PlaybackSyncChannel {
    inner: Arc<ChannelInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSyncChannel {
    pub fn new(store: Arc<dyn SharedStore>, config: SyncConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                store,
                config,
                clock,
                state: Mutex::new(ChannelState::Stopped),
                controller: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ChannelState {
        *self.inner.state.lock().unwrap()
    }

    /// Restore from the store, then begin two-way sync.
    ///
    /// Returns false when the channel was already starting or running; the
    /// call is then ignored.
    pub async fn start(&self, controller: SharedController) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != ChannelState::Stopped {
                debug!("Playback sync already {:?}, ignoring start", *state);
                return false;
            }
            *state = ChannelState::Starting;
        }

        // Subscribe before restoring so nothing written in between is missed
        let store_rx = self.inner.store.subscribe();
        let events_rx = controller.lock().await.subscribe();

        self.inner.restore_from_store(&controller).await;

        let mut state = self.inner.state.lock().unwrap();
        if *state != ChannelState::Starting {
            debug!("Playback sync stopped during start");
            return false;
        }

        *self.inner.controller.lock().unwrap() = Some(controller.clone());
        let handle = tokio::spawn(self.inner.clone().run(controller, events_rx, store_rx));
        *self.task.lock().unwrap() = Some(handle);
        *state = ChannelState::Running;

        info!(
            "Playback sync running on key {}",
            self.inner.config.storage_key
        );
        true
    }

    /// Unsubscribe from the controller and the store. Safe to call repeatedly.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == ChannelState::Stopped {
                return;
            }
            *state = ChannelState::Stopped;
        }

        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.controller.lock().unwrap().take();
        info!("Playback sync stopped");
    }

    /// User-initiated clear: delete the shared entry and return the local
    /// controller to defaults. Other contexts reset when they see the removal.
    pub async fn reset(&self) -> Result<(), StoreError> {
        info!("Clearing shared playback state");
        let removed = self
            .inner
            .store
            .remove(&self.inner.config.storage_key)
            .await;

        if let Some(controller) = self.inner.current_controller() {
            controller
                .lock()
                .await
                .reset_to_defaults(ChangeOrigin::Local);
        }

        removed
    }

    /// Write the current state right away. Best effort, for when the page is
    /// about to be hidden or unloaded.
    pub async fn flush(&self) {
        if !self.inner.is_running() {
            return;
        }
        let Some(controller) = self.inner.current_controller() else {
            return;
        };

        let state = controller.lock().await.state();
        self.inner.write_state(&state, self.inner.clock.now_ms()).await;
    }

    /// Hidden: persist now. Visible again: catch up on writes we may have
    /// missed while in the background.
    pub async fn on_visibility_change(&self, hidden: bool) {
        if hidden {
            self.flush().await;
        } else {
            self.catch_up().await;
        }
    }

    /// Flush then stop; the page is going away
    pub async fn shutdown(&self) {
        self.flush().await;
        self.stop();
    }

    async fn catch_up(&self) {
        if !self.inner.is_running() {
            return;
        }
        let Some(controller) = self.inner.current_controller() else {
            return;
        };

        match self.inner.store.get(&self.inner.config.storage_key).await {
            Ok(Some(raw)) => self.inner.apply_raw(&controller, &raw).await,
            Ok(None) => debug!("No shared playback state to catch up on"),
            Err(e) => warn!("Failed to read shared playback state: {}", e),
        }
    }
}

impl Drop for PlaybackSyncChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ChannelInner {
    fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == ChannelState::Running
    }

    fn current_controller(&self) -> Option<SharedController> {
        self.controller.lock().unwrap().clone()
    }

    async fn run(
        self: Arc<Self>,
        controller: SharedController,
        mut events_rx: tokio_mpsc::UnboundedReceiver<TransportEvent>,
        mut store_rx: tokio_mpsc::UnboundedReceiver<StoreChange>,
    ) {
        let mut last_write_ms: Option<i64> = None;

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    self.handle_transport_event(event, &mut last_write_ms).await;
                }
                Some(change) = store_rx.recv() => {
                    self.handle_store_change(&controller, change).await;
                }
                else => break,
            }
        }

        debug!("Playback sync task exiting");
    }

    async fn handle_transport_event(&self, event: TransportEvent, last_write_ms: &mut Option<i64>) {
        if !self.is_running() || !event.is_local() {
            return;
        }

        match event.kind {
            TransportEventKind::Reset | TransportEventKind::PlaylistExhausted => {}
            TransportEventKind::Position { .. } => {
                if !event.state.is_playing {
                    return;
                }
                let interval =
                    i64::try_from(self.config.heartbeat_interval_ms).unwrap_or(i64::MAX);
                if let Some(last) = *last_write_ms {
                    if event.at_ms.saturating_sub(last) < interval {
                        return;
                    }
                }
                self.write_state(&event.state, event.at_ms).await;
                *last_write_ms = Some(event.at_ms);
            }
            _ => {
                self.write_state(&event.state, event.at_ms).await;
                *last_write_ms = Some(event.at_ms);
            }
        }
    }

    async fn handle_store_change(&self, controller: &SharedController, change: StoreChange) {
        if !self.is_running() || change.key != self.config.storage_key {
            return;
        }

        match change.new_value {
            None => {
                info!("Shared playback state cleared by another context, resetting");
                controller
                    .lock()
                    .await
                    .reset_to_defaults(ChangeOrigin::Remote);
            }
            Some(raw) => self.apply_raw(controller, &raw).await,
        }
    }

    /// Parse, validate and apply a value written by another context. Invalid
    /// values are logged and dropped without touching local state.
    async fn apply_raw(&self, controller: &SharedController, raw: &str) {
        let mut controller = controller.lock().await;

        let snapshot = match PlaybackSnapshot::decode(raw, controller.playlist().len()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring invalid playback state from another context: {}", e);
                return;
            }
        };

        let outcome = controller.apply_snapshot(&snapshot).await;
        debug!("Remote snapshot {} -> {:?}", snapshot.timestamp, outcome);
    }

    async fn restore_from_store(&self, controller: &SharedController) {
        let raw = match self.store.get(&self.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No stored playback state to restore");
                return;
            }
            Err(e) => {
                warn!("Failed to read stored playback state: {}", e);
                return;
            }
        };

        let mut controller = controller.lock().await;
        let snapshot = match PlaybackSnapshot::decode(&raw, controller.playlist().len()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Stored playback state is invalid, starting fresh: {}", e);
                return;
            }
        };

        let now = self.clock.now_ms();
        let stale = snapshot.is_stale(now, self.config.freshness_window());
        if stale && snapshot.is_playing {
            info!(
                "Stored playback state is {}s old, restoring paused",
                snapshot.age_ms(now) / 1000
            );
        }

        let outcome = controller.restore(&snapshot, stale).await;
        debug!("Restored playback state: {:?}", outcome);
    }

    async fn write_state(&self, state: &TransportState, timestamp: i64) {
        let mut snapshot = PlaybackSnapshot::from_state(state, timestamp);
        // Media can report garbage before metadata loads; never publish it
        if !snapshot.position_seconds.is_finite() || snapshot.position_seconds < 0.0 {
            snapshot.position_seconds = 0.0;
        }

        let raw = match snapshot.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode playback state: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.set(&self.config.storage_key, &raw).await {
            warn!("Failed to write playback state: {}", e);
        }
    }
}
