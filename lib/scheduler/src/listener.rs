//! The mutation-event listener.
//!
//! Subscribes to the schedule-mutation channel and converts every event
//! into a resync request. The event content beyond existence is irrelevant:
//! the beat re-reads the authoritative store either way. On subscription
//! loss the listener reconnects with capped exponential backoff; in the
//! meantime the periodic resync provides liveness.

use crate::beat::ResyncHandle;
use marketbeat_bus::EventBus;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// Initial reconnect delay.
const BACKOFF_START: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Runs the listener until shutdown.
pub async fn run_listener(
    bus: Arc<dyn EventBus>,
    handle: ResyncHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = BACKOFF_START;

    loop {
        let mut subscription = tokio::select! {
            result = bus.subscribe() => match result {
                Ok(subscription) => {
                    tracing::debug!("Subscribed to mutation channel");
                    backoff = BACKOFF_START;
                    subscription
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "Mutation channel subscribe failed"
                    );
                    if wait_or_shutdown(backoff, &mut shutdown).await {
                        return;
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue;
                }
            },
            _ = shutdown.changed() => return,
        };

        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => {
                        tracing::debug!(
                            schedule_id = %event.schedule_id,
                            event_type = ?event.event_type,
                            "Mutation event received; requesting resync"
                        );
                        handle.request();
                    }
                    None => {
                        tracing::warn!("Mutation channel closed; reconnecting");
                        break;
                    }
                },
                _ = shutdown.changed() => return,
            }
        }

        if wait_or_shutdown(backoff, &mut shutdown).await {
            return;
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

/// Sleeps for `delay`, returning true when shutdown arrived instead.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}
