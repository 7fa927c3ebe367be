use crate::playback::TransportState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Reasons a stored value cannot be applied. These come from another,
/// possibly differently-versioned, context and are never shown to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("Malformed snapshot: {0}")]
    Parse(String),
    #[error("Track index {index} is outside a playlist of {len} tracks")]
    TrackOutOfRange { index: usize, len: usize },
    #[error("Invalid position: {0}")]
    InvalidPosition(f64),
    #[error("Invalid volume: {0}")]
    InvalidVolume(f64),
}

/// The unit of shared state. Stored as JSON under a single key; each write
/// overwrites the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub track_index: usize,
    pub position_seconds: f64,
    pub volume: f64,
    /// Producer wall clock at creation, ms since epoch
    pub timestamp: i64,
}

impl PlaybackSnapshot {
    pub fn from_state(state: &TransportState, timestamp: i64) -> Self {
        Self {
            is_playing: state.is_playing,
            track_index: state.track_index,
            position_seconds: state.position_seconds,
            volume: state.volume,
            timestamp,
        }
    }

    pub fn transport_state(&self) -> TransportState {
        TransportState {
            is_playing: self.is_playing,
            track_index: self.track_index,
            position_seconds: self.position_seconds,
            volume: self.volume,
        }
    }

    pub fn validate(&self, playlist_len: usize) -> Result<(), SnapshotError> {
        if self.track_index >= playlist_len {
            return Err(SnapshotError::TrackOutOfRange {
                index: self.track_index,
                len: playlist_len,
            });
        }
        if !self.position_seconds.is_finite() || self.position_seconds < 0.0 {
            return Err(SnapshotError::InvalidPosition(self.position_seconds));
        }
        if !self.volume.is_finite() || !(0.0..=1.0).contains(&self.volume) {
            return Err(SnapshotError::InvalidVolume(self.volume));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| SnapshotError::Parse(e.to_string()))
    }

    /// Parse and validate in one step. Nothing is returned for a value that
    /// fails either, so callers never see a partially valid snapshot.
    pub fn decode(raw: &str, playlist_len: usize) -> Result<Self, SnapshotError> {
        let snapshot: PlaybackSnapshot =
            serde_json::from_str(raw).map_err(|e| SnapshotError::Parse(e.to_string()))?;
        snapshot.validate(playlist_len)?;
        Ok(snapshot)
    }

    /// Saturates instead of overflowing on timestamps far from `now_ms`
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    pub fn is_stale(&self, now_ms: i64, freshness_window: Duration) -> bool {
        let window_ms = i64::try_from(freshness_window.as_millis()).unwrap_or(i64::MAX);
        self.age_ms(now_ms) > window_ms
    }
}
