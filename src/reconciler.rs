use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::{BookingEvent, Resource};

/// Background task that keeps the local view in step with changes made by
/// other actors: refetch on every foreign `booking-updated` event and on a
/// fixed interval. Exits when the event channel closes.
pub async fn run_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut events = engine.notify.subscribe_all();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("reconciler started, refreshing every {}s", every.as_secs());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = engine.refresh().await {
                    debug!("periodic refresh skipped: {e}");
                }
            }
            event = events.recv() => match event {
                Ok(ev) if ev.origin == engine.origin() => {}
                Ok(ev) => {
                    debug!(record = %ev.record_id, action = ?ev.action, "foreign change, refreshing");
                    if let Err(e) = engine.refresh().await {
                        warn!("refresh after {} on {} failed: {e}", ev.record_id, ev.resource_id.map_or("-".into(), |r| r.to_string()));
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("reconciler lagged by {missed} events, refreshing");
                    if let Err(e) = engine.refresh().await {
                        warn!("refresh after lag failed: {e}");
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("reconciler stopped");
}

/// Log activity on one resource from its channel. Ends when the channel
/// closes, which a refresh does once the resource is retired.
pub async fn watch_resource(resource: Resource, mut events: broadcast::Receiver<BookingEvent>) {
    loop {
        match events.recv().await {
            Ok(ev) => info!(resource = %resource.name, record = %ev.record_id, action = ?ev.action, "booking activity"),
            Err(RecvError::Lagged(missed)) => warn!(resource = %resource.name, "activity log skipped {missed} events"),
            Err(RecvError::Closed) => break,
        }
    }
    debug!(resource = %resource.name, "stopped watching");
}
