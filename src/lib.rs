// Library exports for the demo binary and integration tests

pub mod clock;
pub mod config;
pub mod countdown;
pub mod playback;
pub mod schedule;
pub mod sync;

// Test support (unit tests, or integration tests via the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use config::{Config, SyncConfig};
pub use playback::{AudioController, PlaybackError, SharedController};
pub use sync::{PlaybackSnapshot, PlaybackSyncChannel, SharedStore};
