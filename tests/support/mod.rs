use std::sync::Arc;
use std::time::Duration;

use tandem::config::SyncConfig;
use tandem::playback::{AudioController, Playlist, SharedController};
use tandem::sync::{PlaybackSyncChannel, SharedStore};
use tandem::test_support::{FakeMedia, ManualClock};

pub const PLAYLIST: [&str; 3] = ["t0.m4a", "t1.m4a", "t2.m4a"];

/// 2024-06-16T00:00:00Z
pub const START_MS: i64 = 1_718_496_000_000;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Let spawned sync tasks drain their queues
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn playlist() -> Arc<Playlist> {
    Arc::new(Playlist::new(PLAYLIST).unwrap())
}

pub fn new_controller(media: &FakeMedia, clock: &Arc<ManualClock>) -> AudioController {
    AudioController::new(
        media.boxed(),
        playlist(),
        clock.clone(),
        &SyncConfig::default(),
    )
}

/// One simulated browsing context: a controller over fake media, bridged to
/// a shared store
pub struct TestContext {
    pub controller: SharedController,
    pub media: FakeMedia,
    pub sync: PlaybackSyncChannel,
}

impl TestContext {
    pub fn new(store: Arc<dyn SharedStore>, clock: &Arc<ManualClock>) -> Self {
        let media = FakeMedia::new();
        let controller = new_controller(&media, clock).into_shared();
        let sync = PlaybackSyncChannel::new(store, SyncConfig::default(), clock.clone());
        Self {
            controller,
            media,
            sync,
        }
    }

    pub async fn started(store: Arc<dyn SharedStore>, clock: &Arc<ManualClock>) -> Self {
        let context = Self::new(store, clock);
        assert!(context.sync.start(context.controller.clone()).await);
        context
    }

    /// Report the current source as loaded with the given duration
    pub async fn load_media(&self, duration: f64) {
        let event = self.media.load_outcome(duration);
        let mut controller = self.controller.lock().await;
        let _ = controller.handle_media_event(event).await;
    }
}
