use crate::playback::controller::SharedController;
use crate::playback::media::MediaEvent;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Forward a backend's events into its controller, and raise a `TimeUpdate`
/// every `tick` while playing for backends that do not report time
/// themselves. Runs until the returned handle is aborted.
pub fn spawn_media_pump(
    controller: SharedController,
    mut events: tokio_mpsc::UnboundedReceiver<MediaEvent>,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    debug!("Media event: {:?}", event);
                    let mut controller = controller.lock().await;
                    if let Err(e) = controller.handle_media_event(event).await {
                        warn!("Media event left playback stopped: {}", e);
                    }
                }
                _ = ticker.tick() => {
                    let mut controller = controller.lock().await;
                    if controller.is_playing() {
                        let position = controller.position();
                        let _ = controller
                            .handle_media_event(MediaEvent::TimeUpdate { position })
                            .await;
                    }
                }
            }
        }
    })
}
