use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The platform refused to start audio without a prior user gesture
    #[error("Playback requires a user gesture")]
    AutoplayBlocked,
    #[error("Media backend error: {0}")]
    Backend(String),
}

/// Events the backend reports back to the controller. The embedding
/// application pumps these into `AudioController::handle_media_event`.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    MetadataLoaded { duration: f64 },
    TimeUpdate { position: f64 },
    Ended,
    LoadFailed { reason: String },
}

/// One playable media resource (an audio element, a sink, a remote player)
#[async_trait::async_trait]
pub trait MediaBackend: Send {
    /// Swap the current source, starting at position 0. A backend that was
    /// playing keeps playing the new source. Loading happens in the
    /// background and is reported through `MediaEvent::MetadataLoaded` or
    /// `MediaEvent::LoadFailed`.
    fn set_source(&mut self, uri: &str);

    /// Start or resume playback. May be refused by autoplay policy.
    async fn play(&mut self) -> Result<(), MediaError>;

    fn pause(&mut self);

    /// Current offset into the source, in seconds
    fn position(&self) -> f64;

    fn set_position(&mut self, seconds: f64);

    fn set_volume(&mut self, volume: f64);
}

/// Backend that produces no sound and advances position with wall time.
/// Used by mirror-only contexts and the demo binary.
///
/// Built with `with_duration`, every source "loads" instantly with that
/// length and a `MetadataLoaded` event is sent on the returned receiver.
/// Feed it to the controller with `spawn_media_pump`.
#[derive(Debug)]
pub struct HeadlessMedia {
    source: Option<String>,
    base_position: f64,
    playing_since: Option<Instant>,
    volume: f64,
    duration: Option<f64>,
    events: Option<tokio_mpsc::UnboundedSender<MediaEvent>>,
}

impl HeadlessMedia {
    pub fn new() -> Self {
        Self {
            source: None,
            base_position: 0.0,
            playing_since: None,
            volume: 1.0,
            duration: None,
            events: None,
        }
    }

    pub fn with_duration(duration: f64) -> (Self, tokio_mpsc::UnboundedReceiver<MediaEvent>) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let media = Self {
            duration: Some(duration),
            events: Some(tx),
            ..Self::new()
        };
        (media, rx)
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }
}

impl Default for HeadlessMedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaBackend for HeadlessMedia {
    fn set_source(&mut self, uri: &str) {
        self.source = Some(uri.to_string());
        self.base_position = 0.0;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }

        if let (Some(duration), Some(events)) = (self.duration, &self.events) {
            if events.send(MediaEvent::MetadataLoaded { duration }).is_err() {
                trace!("No media pump listening for {}", uri);
            }
        }
    }

    async fn play(&mut self) -> Result<(), MediaError> {
        if self.source.is_none() {
            return Err(MediaError::Backend("No source loaded".to_string()));
        }
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(since) = self.playing_since.take() {
            self.base_position += since.elapsed().as_secs_f64();
        }
    }

    fn position(&self) -> f64 {
        let position = match self.playing_since {
            Some(since) => self.base_position + since.elapsed().as_secs_f64(),
            None => self.base_position,
        };
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn set_position(&mut self, seconds: f64) {
        self.base_position = seconds;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }
}
