use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::playback::events::{
    ChangeOrigin, TransportEvent, TransportEventHandle, TransportEventKind, TransportState,
};
use crate::playback::media::{MediaBackend, MediaError, MediaEvent};
use crate::playback::playlist::Playlist;
use crate::sync::snapshot::{PlaybackSnapshot, SnapshotError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Track index {index} is out of range for a playlist of {len} tracks")]
    OutOfRange { index: usize, len: usize },
    #[error("Playback needs a user interaction before it can start")]
    AutoplayBlocked,
    #[error("Every track in the playlist failed to load")]
    PlaylistExhausted,
    #[error("Media error: {0}")]
    Media(MediaError),
}

impl PlaybackError {
    /// Wording for the UI. Autoplay refusal is a prompt, not an error.
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::AutoplayBlocked => "Tap to play music",
            PlaybackError::PlaylistExhausted => "No playable audio",
            PlaybackError::OutOfRange { .. } => "That track is not in the playlist",
            PlaybackError::Media(_) => "Audio is unavailable right now",
        }
    }
}

/// What `apply_snapshot` / `restore` did with a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(AppliedChanges),
    /// Our own last change is newer than the snapshot by more than the tolerance
    IgnoredLocalChangeNewer,
    Rejected(SnapshotError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub track_changed: bool,
    pub position_corrected: bool,
    pub volume_changed: bool,
    pub play_state_changed: bool,
    /// Snapshot asked for playback but the platform refused; we stayed paused
    pub autoplay_blocked: bool,
}

pub type SharedController = Arc<tokio::sync::Mutex<AudioController>>;

/// Owns one media backend and exposes transport operations.
///
/// Every state change is published as a `TransportEvent`. Changes requested
/// through the public transport methods are `Local`; changes made while
/// reconciling to another context's snapshot are `Remote`. The controller
/// never touches the shared store.
pub struct AudioController {
    media: Box<dyn MediaBackend>,
    playlist: Arc<Playlist>,
    clock: SharedClock,
    events: TransportEventHandle,

    track_index: usize,
    is_playing: bool,
    volume: f64,
    /// Unknown until the media reports metadata for the current source
    duration: Option<f64>,
    /// Seek requested before the duration was known; last one wins
    pending_seek: Option<f64>,
    last_local_change_ms: Option<i64>,
    /// Tracks that failed to load this session, never auto-retried
    failed_tracks: HashSet<usize>,
    exhausted: bool,

    apply_tolerance_ms: i64,
    drift_threshold_secs: f64,
    default_volume: f64,
}

impl AudioController {
    /// Loads the first track, paused, at the configured default volume
    pub fn new(
        mut media: Box<dyn MediaBackend>,
        playlist: Arc<Playlist>,
        clock: SharedClock,
        config: &SyncConfig,
    ) -> Self {
        let default_volume = config.default_volume.clamp(0.0, 1.0);
        if let Some(uri) = playlist.get(0) {
            media.set_source(uri);
        }
        media.set_volume(default_volume);

        Self {
            media,
            playlist,
            clock,
            events: TransportEventHandle::new(),
            track_index: 0,
            is_playing: false,
            volume: default_volume,
            duration: None,
            pending_seek: None,
            last_local_change_ms: None,
            failed_tracks: HashSet::new(),
            exhausted: false,
            apply_tolerance_ms: i64::try_from(config.apply_tolerance_ms).unwrap_or(i64::MAX),
            drift_threshold_secs: config.drift_threshold_secs,
            default_volume,
        }
    }

    pub fn into_shared(self) -> SharedController {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<TransportEvent> {
        self.events.subscribe_all()
    }

    pub fn playlist(&self) -> &Arc<Playlist> {
        &self.playlist
    }

    pub fn state(&self) -> TransportState {
        TransportState {
            is_playing: self.is_playing,
            track_index: self.track_index,
            position_seconds: self.position(),
            volume: self.volume,
        }
    }

    pub fn track_index(&self) -> usize {
        self.track_index
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Intended position: a queued seek counts as the position
    pub fn position(&self) -> f64 {
        self.pending_seek.unwrap_or_else(|| self.media.position())
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn last_local_change_ms(&self) -> Option<i64> {
        self.last_local_change_ms
    }

    /// Switch to `index`, starting from the beginning. Playback continues if
    /// it was playing. An explicit load gives an exhausted playlist another
    /// chance.
    pub fn load_track(&mut self, index: usize) -> Result<(), PlaybackError> {
        self.load_track_at(index, 0.0, ChangeOrigin::Local)?;
        self.exhausted = false;
        Ok(())
    }

    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        self.play_with_origin(ChangeOrigin::Local).await
    }

    pub fn pause(&mut self) {
        self.pause_with_origin(ChangeOrigin::Local);
    }

    /// Clamped to `[0, duration]`. Queued until the duration is known.
    pub fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        if self.exhausted {
            return Err(PlaybackError::PlaylistExhausted);
        }
        self.seek_with_origin(seconds, ChangeOrigin::Local);
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.set_volume_with_origin(volume, ChangeOrigin::Local);
    }

    pub fn next(&mut self) -> Result<(), PlaybackError> {
        let index = self.playlist.next_index(self.track_index);
        self.load_track(index)
    }

    pub fn previous(&mut self) -> Result<(), PlaybackError> {
        let index = self.playlist.previous_index(self.track_index);
        self.load_track(index)
    }

    /// Back to defaults: paused, first track, position 0, default volume.
    /// Also forgets which tracks failed this session.
    pub fn reset_to_defaults(&mut self, origin: ChangeOrigin) {
        info!("Resetting playback to defaults ({:?})", origin);
        self.media.pause();
        self.is_playing = false;

        self.track_index = 0;
        self.duration = None;
        self.pending_seek = None;
        if let Some(uri) = self.playlist.get(0) {
            self.media.set_source(uri);
        }
        self.media.set_position(0.0);

        self.volume = self.default_volume;
        self.media.set_volume(self.default_volume);

        self.failed_tracks.clear();
        self.exhausted = false;
        self.last_local_change_ms = None;

        self.emit(TransportEventKind::Reset, origin);
    }

    /// Reconcile to a snapshot written by another context.
    ///
    /// Ignored when our own last local change is newer than the snapshot's
    /// timestamp plus the tolerance. Position is only corrected when the drift
    /// reaches the threshold.
    pub async fn apply_snapshot(&mut self, snapshot: &PlaybackSnapshot) -> ApplyOutcome {
        if let Err(e) = snapshot.validate(self.playlist.len()) {
            return ApplyOutcome::Rejected(e);
        }

        if let Some(last_local) = self.last_local_change_ms {
            // Timestamps come from other contexts and may be absurd
            if last_local > snapshot.timestamp.saturating_add(self.apply_tolerance_ms) {
                debug!(
                    "Ignoring snapshot from {}: local change at {} is newer",
                    snapshot.timestamp, last_local
                );
                return ApplyOutcome::IgnoredLocalChangeNewer;
            }
        }

        let mut changes = AppliedChanges::default();

        if snapshot.track_index != self.track_index {
            // Validated above, cannot be out of range
            if self
                .load_track_at(
                    snapshot.track_index,
                    snapshot.position_seconds,
                    ChangeOrigin::Remote,
                )
                .is_ok()
            {
                changes.track_changed = true;
            }
        } else if (self.position() - snapshot.position_seconds).abs() >= self.drift_threshold_secs
        {
            self.seek_with_origin(snapshot.position_seconds, ChangeOrigin::Remote);
            changes.position_corrected = true;
        }

        if snapshot.volume != self.volume {
            self.set_volume_with_origin(snapshot.volume, ChangeOrigin::Remote);
            changes.volume_changed = true;
        }

        self.match_play_state(snapshot.is_playing, &mut changes).await;

        ApplyOutcome::Applied(changes)
    }

    /// Initial restore on load. Position is taken exactly, and playback only
    /// resumes when the snapshot is fresh.
    pub async fn restore(&mut self, snapshot: &PlaybackSnapshot, stale: bool) -> ApplyOutcome {
        if let Err(e) = snapshot.validate(self.playlist.len()) {
            return ApplyOutcome::Rejected(e);
        }

        let mut changes = AppliedChanges::default();

        if snapshot.track_index != self.track_index {
            if self
                .load_track_at(
                    snapshot.track_index,
                    snapshot.position_seconds,
                    ChangeOrigin::Remote,
                )
                .is_ok()
            {
                changes.track_changed = true;
            }
        } else {
            self.seek_with_origin(snapshot.position_seconds, ChangeOrigin::Remote);
            changes.position_corrected = true;
        }

        if snapshot.volume != self.volume {
            self.set_volume_with_origin(snapshot.volume, ChangeOrigin::Remote);
            changes.volume_changed = true;
        }

        let should_play = snapshot.is_playing && !stale;
        self.match_play_state(should_play, &mut changes).await;

        ApplyOutcome::Applied(changes)
    }

    async fn match_play_state(&mut self, should_play: bool, changes: &mut AppliedChanges) {
        if should_play && !self.is_playing {
            match self.play_with_origin(ChangeOrigin::Remote).await {
                Ok(()) => changes.play_state_changed = true,
                Err(PlaybackError::AutoplayBlocked) => {
                    info!("Remote state is playing but autoplay is blocked, staying paused");
                    changes.autoplay_blocked = true;
                }
                Err(e) => warn!("Could not resume playback from remote state: {}", e),
            }
        } else if !should_play && self.is_playing {
            self.pause_with_origin(ChangeOrigin::Remote);
            changes.play_state_changed = true;
        }
    }

    /// Feed an event from the media backend. Only a load failure that
    /// exhausts the playlist returns an error.
    pub async fn handle_media_event(&mut self, event: MediaEvent) -> Result<(), PlaybackError> {
        match event {
            MediaEvent::MetadataLoaded { duration } => {
                if duration.is_nan() || duration < 0.0 {
                    warn!("Ignoring invalid duration {} for track {}", duration, self.track_index);
                    return Ok(());
                }
                debug!("Track {} duration: {}s", self.track_index, duration);
                self.duration = Some(duration);
                if let Some(target) = self.pending_seek.take() {
                    debug!("Applying queued seek to {}s", target.min(duration));
                    self.media.set_position(target.min(duration));
                }
                Ok(())
            }
            MediaEvent::TimeUpdate { position } => {
                if self.is_playing {
                    self.emit(TransportEventKind::Position { position }, ChangeOrigin::Local);
                }
                Ok(())
            }
            MediaEvent::Ended => match self.next_healthy_index() {
                Some(next) => {
                    info!("Track {} ended, advancing to {}", self.track_index, next);
                    self.load_track_at(next, 0.0, ChangeOrigin::Local)?;
                    self.resume_after_swap().await;
                    Ok(())
                }
                None => {
                    info!("Track {} ended with nothing left to play", self.track_index);
                    self.pause_with_origin(ChangeOrigin::Local);
                    Ok(())
                }
            },
            MediaEvent::LoadFailed { reason } => self.recover_from_load_failure(&reason).await,
        }
    }

    async fn recover_from_load_failure(&mut self, reason: &str) -> Result<(), PlaybackError> {
        warn!("Track {} failed to load: {}", self.track_index, reason);
        self.failed_tracks.insert(self.track_index);

        match self.next_healthy_index() {
            Some(index) => {
                info!("Skipping to track {} after load failure", index);
                self.load_track_at(index, 0.0, ChangeOrigin::Local)?;
                self.resume_after_swap().await;
                Ok(())
            }
            None => {
                error!("Every track in the playlist failed to load, stopping playback");
                self.exhausted = true;
                self.media.pause();
                self.is_playing = false;
                self.emit(TransportEventKind::PlaylistExhausted, ChangeOrigin::Local);
                Err(PlaybackError::PlaylistExhausted)
            }
        }
    }

    /// Next track after the current one that has not failed this session,
    /// wrapping around. May be the current track itself.
    fn next_healthy_index(&self) -> Option<usize> {
        let len = self.playlist.len();
        (1..=len)
            .map(|step| (self.track_index + step) % len)
            .find(|index| !self.failed_tracks.contains(index))
    }

    /// After the media stopped on its own, restart it on the new source
    async fn resume_after_swap(&mut self) {
        if !self.is_playing {
            return;
        }
        if let Err(e) = self.media.play().await {
            warn!("Could not continue playback on track {}: {}", self.track_index, e);
            self.is_playing = false;
            self.emit(
                TransportEventKind::PlayStateChanged { playing: false },
                ChangeOrigin::Local,
            );
        }
    }

    fn load_track_at(
        &mut self,
        index: usize,
        resume_at: f64,
        origin: ChangeOrigin,
    ) -> Result<(), PlaybackError> {
        let uri = self
            .playlist
            .get(index)
            .ok_or(PlaybackError::OutOfRange {
                index,
                len: self.playlist.len(),
            })?
            .to_string();

        info!("Loading track {}: {}", index, uri);
        self.track_index = index;
        self.duration = None;
        self.pending_seek = None;
        self.media.set_source(&uri);

        if resume_at > 0.0 && resume_at.is_finite() {
            self.pending_seek = Some(resume_at);
        }

        self.emit(TransportEventKind::TrackChanged { index }, origin);
        Ok(())
    }

    async fn play_with_origin(&mut self, origin: ChangeOrigin) -> Result<(), PlaybackError> {
        if self.exhausted {
            return Err(PlaybackError::PlaylistExhausted);
        }
        if self.is_playing {
            return Ok(());
        }

        match self.media.play().await {
            Ok(()) => {
                self.is_playing = true;
                self.emit(TransportEventKind::PlayStateChanged { playing: true }, origin);
                Ok(())
            }
            Err(MediaError::AutoplayBlocked) => {
                warn!("Playback blocked until the user interacts with the page");
                self.is_playing = false;
                Err(PlaybackError::AutoplayBlocked)
            }
            Err(e) => {
                error!("Failed to start playback: {}", e);
                self.is_playing = false;
                Err(PlaybackError::Media(e))
            }
        }
    }

    fn pause_with_origin(&mut self, origin: ChangeOrigin) {
        self.media.pause();
        if self.is_playing {
            self.is_playing = false;
            self.emit(TransportEventKind::PlayStateChanged { playing: false }, origin);
        }
    }

    fn seek_with_origin(&mut self, seconds: f64, origin: ChangeOrigin) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };

        match self.duration {
            Some(duration) => {
                self.pending_seek = None;
                self.media.set_position(seconds.min(duration));
            }
            None => {
                debug!("Duration unknown, queueing seek to {}s", seconds);
                self.pending_seek = Some(seconds);
            }
        }

        let position = self.position();
        self.emit(TransportEventKind::Seeked { position }, origin);
    }

    fn set_volume_with_origin(&mut self, volume: f64, origin: ChangeOrigin) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume = volume;
        self.media.set_volume(volume);
        self.emit(TransportEventKind::VolumeChanged { volume }, origin);
    }

    fn emit(&mut self, kind: TransportEventKind, origin: ChangeOrigin) {
        let at_ms = self.clock.now_ms();

        let counts_as_change = !matches!(
            kind,
            TransportEventKind::Position { .. } | TransportEventKind::Reset
        );
        if origin == ChangeOrigin::Local && counts_as_change {
            self.last_local_change_ms = Some(at_ms);
        }

        self.events.publish(TransportEvent {
            kind,
            origin,
            state: self.state(),
            at_ms,
        });
    }
}
