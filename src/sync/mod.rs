pub mod channel;
pub mod snapshot;
pub mod store;

pub use channel::{ChannelState, PlaybackSyncChannel};
pub use snapshot::{PlaybackSnapshot, SnapshotError};
pub use store::{MemoryStore, SharedStore, StoreChange, StoreError};
