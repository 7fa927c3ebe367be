use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A repeating task: every `period`, while `condition` holds, run `action`.
///
/// The first tick fires immediately. The task ends on its own once the
/// condition returns false, and can be cancelled as a unit with `cancel()` or
/// by dropping the handle.
pub struct PeriodicTask {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn on the current tokio runtime
    pub fn spawn<C, A>(name: &str, period: Duration, mut condition: C, mut action: A) -> Self
    where
        C: FnMut() -> bool + Send + 'static,
        A: FnMut() + Send + 'static,
    {
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !condition() {
                    debug!("Periodic task {} finished: condition no longer holds", task_name);
                    break;
                }
                action();
            }
        });

        Self {
            name: name.to_string(),
            handle: Some(handle),
        }
    }

    /// Whether the task is still scheduled
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the task. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Cancelling periodic task {}", self.name);
            handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
