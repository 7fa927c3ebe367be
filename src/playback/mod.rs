pub mod controller;
pub mod events;
pub mod media;
pub mod playlist;
pub mod pump;

pub use controller::{
    AppliedChanges, ApplyOutcome, AudioController, PlaybackError, SharedController,
};
pub use events::{
    ChangeOrigin, TransportEvent, TransportEventHandle, TransportEventKind, TransportState,
};
pub use media::{HeadlessMedia, MediaBackend, MediaError, MediaEvent};
pub use playlist::{Playlist, PlaylistError};
pub use pump::spawn_media_pump;
