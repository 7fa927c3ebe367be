use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tandem::clock::system_clock;
use tandem::config::Config;
use tandem::countdown::{format_clock, next_milestone, TimeDifference};
use tandem::playback::{spawn_media_pump, AudioController, HeadlessMedia};
use tandem::sync::{MemoryStore, PlaybackSyncChannel, SharedStore};
use tracing::{error, info};

const DEMO_TRACK_SECONDS: f64 = 180.0;

const DEMO_PLAYLIST: [&str; 3] = [
    "music/track-0.m4a",
    "music/track-1.m4a",
    "music/track-2.m4a",
];

/// Two contexts sharing one store: the first one drives playback, the
/// second one follows it.
#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if config.playlist.is_empty() {
        config.playlist = DEMO_PLAYLIST.iter().map(|s| s.to_string()).collect();
    }

    let playlist = match config.playlist() {
        Ok(playlist) => Arc::new(playlist),
        Err(e) => {
            error!("Invalid playlist: {}", e);
            std::process::exit(1);
        }
    };

    let clock = system_clock();
    let first_store = MemoryStore::new();
    let second_store = first_store.connect_peer();

    let (first_media, first_events) = HeadlessMedia::with_duration(DEMO_TRACK_SECONDS);
    let first = AudioController::new(
        Box::new(first_media),
        playlist.clone(),
        clock.clone(),
        &config.sync,
    )
    .into_shared();
    let (second_media, second_events) = HeadlessMedia::with_duration(DEMO_TRACK_SECONDS);
    let second = AudioController::new(
        Box::new(second_media),
        playlist.clone(),
        clock.clone(),
        &config.sync,
    )
    .into_shared();

    let tick = config.sync.heartbeat_interval() / 4;
    let first_pump = spawn_media_pump(first.clone(), first_events, tick);
    let second_pump = spawn_media_pump(second.clone(), second_events, tick);

    let first_store: Arc<dyn SharedStore> = Arc::new(first_store);
    let second_store: Arc<dyn SharedStore> = Arc::new(second_store);
    let first_sync = PlaybackSyncChannel::new(first_store, config.sync.clone(), clock.clone());
    let second_sync = PlaybackSyncChannel::new(second_store, config.sync.clone(), clock.clone());
    first_sync.start(first.clone()).await;
    second_sync.start(second.clone()).await;

    {
        let mut controller = first.lock().await;
        if let Err(e) = controller.play().await {
            error!("{}", e.user_message());
        }
        controller.set_volume(0.6);
        if let Err(e) = controller.load_track(1) {
            error!("{}", e);
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    if let Err(e) = first.lock().await.seek(42.0) {
        error!("{}", e);
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;

    {
        let first = first.lock().await;
        let second = second.lock().await;
        info!(
            "first: track {} playing={} at {}",
            first.track_index(),
            first.is_playing(),
            format_clock(first.position())
        );
        info!(
            "second: track {} playing={} at {}",
            second.track_index(),
            second.is_playing(),
            format_clock(second.position())
        );
    }

    if let Some(start) = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single() {
        let since = TimeDifference::between(start, Utc::now());
        info!("Together for {}", since.formatted());
        if let Some(milestone) = next_milestone(since.total_days) {
            info!(
                "Next milestone: {} in {} days",
                milestone.name, milestone.days_remaining
            );
        }
    }

    first_sync.shutdown().await;
    second_sync.shutdown().await;
    first_pump.abort();
    second_pump.abort();
}
