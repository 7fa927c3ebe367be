use super::TimeDifference;
use crate::clock::SharedClock;
use crate::schedule::PeriodicTask;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, warn};

type Subscribers = Arc<Mutex<Vec<tokio_mpsc::UnboundedSender<TimeDifference>>>>;

/// Publishes the time remaining until (or elapsed since) a target date
/// to every subscriber, once per update interval while started.
pub struct Countdown {
    target: Arc<Mutex<DateTime<Utc>>>,
    update_interval: Duration,
    clock: SharedClock,
    subscribers: Subscribers,
    task: Option<PeriodicTask>,
}

impl Countdown {
    pub fn new(target: DateTime<Utc>, update_interval: Duration, clock: SharedClock) -> Self {
        Self {
            target: Arc::new(Mutex::new(target)),
            update_interval,
            clock,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            task: None,
        }
    }

    /// Subscription ends when the receiver is dropped
    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<TimeDifference> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Difference between the target and the clock's current time
    pub fn current(&self) -> TimeDifference {
        let target = *self.target.lock().unwrap();
        TimeDifference::between(target, now(&self.clock))
    }

    /// Starts ticking with an immediate first update. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let target = self.target.clone();
        let clock = self.clock.clone();
        let subscribers = self.subscribers.clone();

        self.task = Some(PeriodicTask::spawn(
            "countdown",
            self.update_interval,
            || true,
            move || {
                let diff = TimeDifference::between(*target.lock().unwrap(), now(&clock));
                publish(&subscribers, diff);
            },
        ));
        debug!("Countdown started");
    }

    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
            debug!("Countdown stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| t.is_active()).unwrap_or(false)
    }

    /// Retarget and push an update right away
    pub fn set_target(&self, target: DateTime<Utc>) {
        *self.target.lock().unwrap() = target;
        publish(&self.subscribers, self.current());
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}

fn now(clock: &SharedClock) -> DateTime<Utc> {
    let ms = clock.now_ms();
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(|| {
        warn!("Clock returned out-of-range timestamp {}, using system time", ms);
        Utc::now()
    })
}

fn publish(subscribers: &Subscribers, diff: TimeDifference) {
    // Closed receivers are dropped from the list
    subscribers
        .lock()
        .unwrap()
        .retain(|tx| tx.send(diff.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FixedClock(AtomicI64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn countdown_at(now_ms: i64, target: DateTime<Utc>) -> (Countdown, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock(AtomicI64::new(now_ms)));
        let countdown = Countdown::new(target, Duration::from_secs(1), clock.clone());
        (countdown, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_publishes_immediately_then_every_interval() {
        let target = Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).unwrap();
        let start_ms = target.timestamp_millis() - 10_000;
        let (mut countdown, clock) = countdown_at(start_ms, target);
        let mut rx = countdown.subscribe();

        countdown.start();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.total_seconds, 10);
        assert!(first.is_target_in_future);

        clock.0.store(start_ms + 1_000, Ordering::SeqCst);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.total_seconds, 9);

        countdown.stop();
        assert!(!countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let target = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let (mut countdown, _clock) = countdown_at(target.timestamp_millis(), target);
        let mut rx = countdown.subscribe();

        countdown.start();
        countdown.start();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // A second ticker would have produced a second immediate update
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_target_notifies() {
        let target = Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).unwrap();
        let (countdown, _clock) = countdown_at(target.timestamp_millis(), target);
        let mut rx = countdown.subscribe();

        countdown.set_target(target + chrono::Duration::days(2));
        let diff = rx.recv().await.unwrap();
        assert_eq!(diff.days, 2);
        assert_eq!(diff.formatted(), "2 days");
    }
}
