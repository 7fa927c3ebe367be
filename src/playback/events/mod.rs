pub mod handle;

pub use handle::TransportEventHandle;
use serde::{Deserialize, Serialize};

/// Where a transport change came from. Only local changes are replicated;
/// changes applied from another context are never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// The transport values that make up a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub is_playing: bool,
    pub track_index: usize,
    pub position_seconds: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    TrackChanged { index: usize },
    PlayStateChanged { playing: bool },
    Seeked { position: f64 },
    VolumeChanged { volume: f64 },
    /// Raw time update from the media; rate limiting is up to the consumer
    Position { position: f64 },
    Reset,
    PlaylistExhausted,
}

/// Notification emitted by the controller after its state changed
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub kind: TransportEventKind,
    pub origin: ChangeOrigin,
    /// Controller state right after the change
    pub state: TransportState,
    /// Clock time of the change, in ms since epoch
    pub at_ms: i64,
}

impl TransportEvent {
    pub fn is_local(&self) -> bool {
        self.origin == ChangeOrigin::Local
    }
}
