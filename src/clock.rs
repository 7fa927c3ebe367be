use std::sync::Arc;

/// Wall-clock source in milliseconds since the Unix epoch.
///
/// Snapshots are stamped and compared with this clock, so every context on a
/// machine should use the same implementation. Tests inject a manual clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
