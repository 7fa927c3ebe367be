#![cfg(feature = "test-utils")]

mod support;
use proptest::prelude::*;
use tandem::config::SyncConfig;
use tandem::playback::{
    ApplyOutcome, AudioController, ChangeOrigin, MediaEvent, PlaybackError, TransportEventKind,
};
use tandem::sync::{PlaybackSnapshot, SnapshotError};
use tandem::test_support::{FakeMedia, ManualClock};

use crate::support::{new_controller, playlist, tracing_init, PLAYLIST, START_MS};

fn snapshot(track_index: usize, position: f64, playing: bool, timestamp: i64) -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_playing: playing,
        track_index,
        position_seconds: position,
        volume: 0.3,
        timestamp,
    }
}

#[tokio::test]
async fn test_out_of_range_load_changes_nothing() {
    tracing_init();
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    controller.load_track(1).unwrap();
    controller
        .handle_media_event(MediaEvent::MetadataLoaded { duration: 180.0 })
        .await
        .unwrap();
    controller.play().await.unwrap();
    controller.seek(10.0).unwrap();

    let mut events = controller.subscribe();
    let before = controller.state();

    let result = controller.load_track(5);
    assert_eq!(result, Err(PlaybackError::OutOfRange { index: 5, len: 3 }));

    let after = controller.state();
    assert_eq!(before, after);
    assert_eq!(after.track_index, 1);
    assert!(after.is_playing);
    assert_eq!(after.position_seconds, 10.0);
    assert_eq!(after.volume, 0.3);
    assert!(events.try_recv().is_err(), "no event for a rejected load");
    assert_eq!(media.state().source.as_deref(), Some(PLAYLIST[1]));
}

#[tokio::test]
async fn test_new_controller_starts_paused_at_defaults() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let controller = new_controller(&media, &clock);

    assert_eq!(controller.track_index(), 0);
    assert!(!controller.is_playing());
    assert_eq!(controller.volume(), 0.3);
    assert_eq!(controller.duration(), None);
    assert_eq!(controller.last_local_change_ms(), None);

    let media_state = media.state();
    assert_eq!(media_state.loads, vec![PLAYLIST[0].to_string()]);
    assert_eq!(media_state.volume, 0.3);
}

#[tokio::test]
async fn test_local_changes_are_published_in_order() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);
    let mut events = controller.subscribe();

    controller.play().await.unwrap();
    clock.advance(100);
    controller.set_volume(0.8);
    clock.advance(100);
    controller.pause();
    // Already paused: nothing to report
    controller.pause();

    let first = events.try_recv().unwrap();
    assert_eq!(first.kind, TransportEventKind::PlayStateChanged { playing: true });
    assert_eq!(first.origin, ChangeOrigin::Local);
    assert_eq!(first.at_ms, START_MS);

    let second = events.try_recv().unwrap();
    assert_eq!(second.kind, TransportEventKind::VolumeChanged { volume: 0.8 });
    assert_eq!(second.state.volume, 0.8);
    assert!(second.state.is_playing);

    let third = events.try_recv().unwrap();
    assert_eq!(third.kind, TransportEventKind::PlayStateChanged { playing: false });
    assert_eq!(third.at_ms, START_MS + 200);

    assert!(events.try_recv().is_err());
    assert_eq!(controller.last_local_change_ms(), Some(START_MS + 200));
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    controller.set_volume(1.7);
    assert_eq!(controller.volume(), 1.0);
    controller.set_volume(-0.2);
    assert_eq!(controller.volume(), 0.0);
    controller.set_volume(f64::NAN);
    assert_eq!(controller.volume(), 0.0);
    assert_eq!(media.state().volume, 0.0);
}

#[tokio::test]
async fn test_seek_is_queued_until_duration_known() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    controller.seek(20.0).unwrap();
    controller.seek(50.0).unwrap();
    assert_eq!(controller.position(), 50.0, "last queued seek wins");
    assert_eq!(media.state().position, 0.0);

    controller
        .handle_media_event(MediaEvent::MetadataLoaded { duration: 40.0 })
        .await
        .unwrap();
    assert_eq!(controller.duration(), Some(40.0));
    assert_eq!(media.state().position, 40.0, "queued seek clamped to duration");

    controller.seek(100.0).unwrap();
    assert_eq!(controller.position(), 40.0);
    controller.seek(-5.0).unwrap();
    assert_eq!(controller.position(), 0.0);
}

#[tokio::test]
async fn test_next_and_previous_wrap() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    controller.previous().unwrap();
    assert_eq!(controller.track_index(), 2);
    controller.next().unwrap();
    assert_eq!(controller.track_index(), 0);
    controller.next().unwrap();
    assert_eq!(controller.track_index(), 1);
    assert_eq!(media.state().source.as_deref(), Some(PLAYLIST[1]));
}

#[tokio::test]
async fn test_track_end_advances_and_keeps_playing() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    controller.load_track(2).unwrap();
    controller.play().await.unwrap();
    controller.handle_media_event(MediaEvent::Ended).await.unwrap();

    assert_eq!(controller.track_index(), 0);
    assert!(controller.is_playing());
    let media_state = media.state();
    assert!(media_state.playing);
    assert_eq!(media_state.source.as_deref(), Some(PLAYLIST[0]));
}

#[tokio::test]
async fn test_time_updates_only_reported_while_playing() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);
    let mut events = controller.subscribe();

    controller
        .handle_media_event(MediaEvent::TimeUpdate { position: 1.0 })
        .await
        .unwrap();
    assert!(events.try_recv().is_err());

    controller.play().await.unwrap();
    let _ = events.try_recv();
    clock.advance(5_000);
    media.set_position(5.0);
    controller
        .handle_media_event(MediaEvent::TimeUpdate { position: 5.0 })
        .await
        .unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, TransportEventKind::Position { position: 5.0 });
    assert_eq!(event.state.position_seconds, 5.0);
    // Heartbeats do not count as user changes
    assert_eq!(controller.last_local_change_ms(), Some(START_MS));
}

#[tokio::test]
async fn test_every_track_failing_exhausts_playlist_once() {
    tracing_init();
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    for track in PLAYLIST {
        media.break_source(track);
    }
    let mut controller = new_controller(&media, &clock);
    let mut events = controller.subscribe();

    controller.load_track(1).unwrap();
    controller.play().await.unwrap();

    // t1 fails -> t2
    let outcome = media.load_outcome(60.0);
    assert!(controller.handle_media_event(outcome).await.is_ok());
    assert_eq!(controller.track_index(), 2);

    // t2 fails -> wraps to t0
    let outcome = media.load_outcome(60.0);
    assert!(controller.handle_media_event(outcome).await.is_ok());
    assert_eq!(controller.track_index(), 0);

    // t0 fails -> nothing left
    let outcome = media.load_outcome(60.0);
    assert_eq!(
        controller.handle_media_event(outcome).await,
        Err(PlaybackError::PlaylistExhausted)
    );

    // The initial t0 load happened at construction, before any failure
    let loads = media.loads();
    assert_eq!(&loads[1..], &[PLAYLIST[1], PLAYLIST[2], PLAYLIST[0]]);

    assert!(controller.is_exhausted());
    assert!(!controller.is_playing());
    assert!(!media.state().playing);
    assert_eq!(controller.play().await, Err(PlaybackError::PlaylistExhausted));
    assert_eq!(controller.seek(3.0), Err(PlaybackError::PlaylistExhausted));
    assert_eq!(media.loads().len(), 4, "no retry after exhaustion");

    let mut saw_exhausted = false;
    while let Ok(event) = events.try_recv() {
        if event.kind == TransportEventKind::PlaylistExhausted {
            saw_exhausted = true;
        }
    }
    assert!(saw_exhausted);
    assert_eq!(
        PlaybackError::PlaylistExhausted.user_message(),
        "No playable audio"
    );

    // A reset forgets the failures
    controller.reset_to_defaults(ChangeOrigin::Local);
    assert!(!controller.is_exhausted());
    assert_eq!(controller.track_index(), 0);
}

#[tokio::test]
async fn test_single_failure_skips_to_next_track() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    media.break_source(PLAYLIST[0]);
    let mut controller = new_controller(&media, &clock);
    controller.play().await.unwrap();

    let outcome = media.load_outcome(60.0);
    controller.handle_media_event(outcome).await.unwrap();
    assert_eq!(controller.track_index(), 1);
    assert!(controller.is_playing());

    let outcome = media.load_outcome(60.0);
    assert_eq!(outcome, MediaEvent::MetadataLoaded { duration: 60.0 });
    controller.handle_media_event(outcome).await.unwrap();
    assert_eq!(controller.duration(), Some(60.0));
}

#[tokio::test]
async fn test_autoplay_blocked_leaves_paused() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    media.block_autoplay(true);
    let mut controller = new_controller(&media, &clock);

    let result = controller.play().await;
    assert_eq!(result, Err(PlaybackError::AutoplayBlocked));
    assert_eq!(result.unwrap_err().user_message(), "Tap to play music");
    assert!(!controller.is_playing());

    clock.advance(10_000);
    let outcome = controller
        .apply_snapshot(&snapshot(0, 0.0, true, START_MS + 10_000))
        .await;
    match outcome {
        ApplyOutcome::Applied(changes) => {
            assert!(changes.autoplay_blocked);
            assert!(!changes.play_state_changed);
        }
        other => panic!("Expected Applied, got {:?}", other),
    }
    assert!(!controller.is_playing());

    // After a user gesture the next play works
    media.block_autoplay(false);
    controller.play().await.unwrap();
    assert!(controller.is_playing());
    assert_eq!(media.state().play_attempts, 3);
}

#[tokio::test]
async fn test_small_drift_is_not_corrected() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);
    controller
        .handle_media_event(MediaEvent::MetadataLoaded { duration: 200.0 })
        .await
        .unwrap();
    media.set_position(30.0);

    let outcome = controller
        .apply_snapshot(&snapshot(0, 31.5, false, START_MS))
        .await;
    match outcome {
        ApplyOutcome::Applied(changes) => assert!(!changes.position_corrected),
        other => panic!("Expected Applied, got {:?}", other),
    }
    assert_eq!(controller.position(), 30.0);

    let outcome = controller
        .apply_snapshot(&snapshot(0, 28.1, false, START_MS))
        .await;
    assert!(matches!(outcome, ApplyOutcome::Applied(ref c) if !c.position_corrected));
    assert_eq!(controller.position(), 30.0);

    // Exactly at the threshold is corrected
    let outcome = controller
        .apply_snapshot(&snapshot(0, 32.0, false, START_MS))
        .await;
    assert!(matches!(outcome, ApplyOutcome::Applied(ref c) if c.position_corrected));
    assert_eq!(controller.position(), 32.0);
    assert_eq!(media.state().position, 32.0);
}

#[tokio::test]
async fn test_invalid_snapshot_does_not_mutate() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);
    let mut events = controller.subscribe();
    let before = controller.state();

    let cases = [
        (
            snapshot(3, 0.0, true, START_MS),
            SnapshotError::TrackOutOfRange { index: 3, len: 3 },
        ),
        (
            snapshot(1, -1.0, true, START_MS),
            SnapshotError::InvalidPosition(-1.0),
        ),
        (
            PlaybackSnapshot {
                volume: 1.5,
                ..snapshot(1, 5.0, true, START_MS)
            },
            SnapshotError::InvalidVolume(1.5),
        ),
    ];

    for (bad, expected) in cases {
        let outcome = controller.apply_snapshot(&bad).await;
        assert_eq!(outcome, ApplyOutcome::Rejected(expected));
    }

    let nan_position = snapshot(1, f64::NAN, true, START_MS);
    assert!(matches!(
        controller.apply_snapshot(&nan_position).await,
        ApplyOutcome::Rejected(SnapshotError::InvalidPosition(_))
    ));
    let infinite_volume = PlaybackSnapshot {
        volume: f64::INFINITY,
        ..snapshot(1, 5.0, true, START_MS)
    };
    assert!(matches!(
        controller.restore(&infinite_volume, false).await,
        ApplyOutcome::Rejected(SnapshotError::InvalidVolume(_))
    ));

    assert_eq!(controller.state(), before);
    assert_eq!(media.loads().len(), 1);
    assert_eq!(media.state().play_attempts, 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_newer_local_change_wins_over_old_snapshot() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    clock.advance(1_000);
    controller.set_volume(0.5);
    let local_change = START_MS + 1_000;

    let old = PlaybackSnapshot {
        volume: 0.9,
        ..snapshot(2, 0.0, true, local_change - 1_000)
    };
    assert_eq!(
        controller.apply_snapshot(&old).await,
        ApplyOutcome::IgnoredLocalChangeNewer
    );
    assert_eq!(controller.volume(), 0.5);
    assert_eq!(controller.track_index(), 0);

    // Within the tolerance the snapshot still applies
    let close = PlaybackSnapshot {
        volume: 0.9,
        ..snapshot(2, 12.0, false, local_change - 200)
    };
    let outcome = controller.apply_snapshot(&close).await;
    match outcome {
        ApplyOutcome::Applied(changes) => {
            assert!(changes.track_changed);
            assert!(changes.volume_changed);
        }
        other => panic!("Expected Applied, got {:?}", other),
    }
    assert_eq!(controller.volume(), 0.9);
    assert_eq!(controller.track_index(), 2);
    assert_eq!(controller.position(), 12.0, "resume point queued on the new track");

    // Applying remote state is not a local change
    assert_eq!(controller.last_local_change_ms(), Some(local_change));
}

#[tokio::test]
async fn test_remote_changes_are_marked_remote() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);
    let mut events = controller.subscribe();

    controller
        .apply_snapshot(&snapshot(1, 0.0, true, START_MS))
        .await;

    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.origin, ChangeOrigin::Remote);
        count += 1;
    }
    assert_eq!(count, 2, "track change and play state");
    assert!(controller.is_playing());
    assert_eq!(controller.last_local_change_ms(), None);
}

#[tokio::test]
async fn test_stale_restore_stays_paused() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    let stored = PlaybackSnapshot {
        volume: 0.7,
        ..snapshot(2, 45.0, true, START_MS - 600_000)
    };
    let outcome = controller.restore(&stored, true).await;
    assert!(matches!(outcome, ApplyOutcome::Applied(_)));

    assert!(!controller.is_playing());
    assert_eq!(controller.track_index(), 2);
    assert_eq!(controller.position(), 45.0);
    assert_eq!(controller.volume(), 0.7);
    assert_eq!(media.state().play_attempts, 0);
}

#[tokio::test]
async fn test_reset_returns_to_defaults() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let mut controller = new_controller(&media, &clock);

    controller.load_track(2).unwrap();
    controller.play().await.unwrap();
    controller.set_volume(0.9);
    let mut events = controller.subscribe();

    controller.reset_to_defaults(ChangeOrigin::Remote);

    assert_eq!(controller.track_index(), 0);
    assert!(!controller.is_playing());
    assert_eq!(controller.position(), 0.0);
    assert_eq!(controller.volume(), 0.3);
    assert_eq!(controller.last_local_change_ms(), None);
    assert!(!media.state().playing);

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, TransportEventKind::Reset);
    assert_eq!(event.origin, ChangeOrigin::Remote);
}

#[tokio::test]
async fn test_track_end_skips_tracks_that_failed() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    media.break_source(PLAYLIST[1]);
    let mut controller = new_controller(&media, &clock);

    controller.load_track(1).unwrap();
    controller.play().await.unwrap();
    let outcome = media.load_outcome(60.0);
    controller.handle_media_event(outcome).await.unwrap();
    assert_eq!(controller.track_index(), 2);

    controller.handle_media_event(MediaEvent::Ended).await.unwrap();
    assert_eq!(controller.track_index(), 0);
    controller.handle_media_event(MediaEvent::Ended).await.unwrap();
    assert_eq!(controller.track_index(), 2, "failed track 1 is not retried");
    assert!(controller.is_playing());

    let t1_loads = media
        .loads()
        .iter()
        .filter(|uri| uri.as_str() == PLAYLIST[1])
        .count();
    assert_eq!(t1_loads, 1);
}

#[tokio::test]
async fn test_huge_tolerance_does_not_wrap() {
    let clock = ManualClock::new(START_MS);
    let media = FakeMedia::new();
    let config = SyncConfig {
        apply_tolerance_ms: u64::MAX,
        ..SyncConfig::default()
    };
    let mut controller = AudioController::new(media.boxed(), playlist(), clock.clone(), &config);

    clock.advance(60_000);
    controller.set_volume(0.5);
    let old = PlaybackSnapshot {
        volume: 0.9,
        ..snapshot(0, 0.0, false, START_MS)
    };
    assert!(matches!(
        controller.apply_snapshot(&old).await,
        ApplyOutcome::Applied(_)
    ));
    assert_eq!(controller.volume(), 0.9);
}

#[derive(Debug, Clone)]
enum Violation {
    Track(usize),
    Position(f64),
    Volume(f64),
}

fn violation() -> impl Strategy<Value = Violation> {
    let bad_number = || {
        prop_oneof![
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            -1e9f64..-1e-9,
        ]
    };
    prop_oneof![
        (PLAYLIST.len()..100_000usize).prop_map(Violation::Track),
        bad_number().prop_map(Violation::Position),
        prop_oneof![bad_number(), 1.000_001f64..1e9].prop_map(Violation::Volume),
    ]
}

fn invalid_snapshot() -> impl Strategy<Value = PlaybackSnapshot> {
    (
        any::<bool>(),
        0..PLAYLIST.len(),
        0.0..1e5f64,
        0.0..=1.0f64,
        any::<i64>(),
        violation(),
    )
        .prop_map(|(is_playing, track_index, position, volume, timestamp, violation)| {
            let mut snapshot = PlaybackSnapshot {
                is_playing,
                track_index,
                position_seconds: position,
                volume,
                timestamp,
            };
            match violation {
                Violation::Track(index) => snapshot.track_index = index,
                Violation::Position(p) => snapshot.position_seconds = p,
                Violation::Volume(v) => snapshot.volume = v,
            }
            snapshot
        })
}

proptest! {
    #[test]
    fn test_any_invalid_snapshot_is_rejected_without_mutation(bad in invalid_snapshot()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let clock = ManualClock::new(START_MS);
            let media = FakeMedia::new();
            let mut controller = new_controller(&media, &clock);
            controller.load_track(1).unwrap();
            controller.set_volume(0.6);
            let before = controller.state();

            assert!(bad.validate(PLAYLIST.len()).is_err());
            assert!(matches!(
                controller.apply_snapshot(&bad).await,
                ApplyOutcome::Rejected(_)
            ));
            assert!(matches!(
                controller.restore(&bad, false).await,
                ApplyOutcome::Rejected(_)
            ));
            assert_eq!(controller.state(), before);
            assert_eq!(media.state().play_attempts, 0);
        });
    }
}
