use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::hub::Hub;

/// Deletes idle rooms every `interval` until `shutdown` flips to true.
pub async fn sweep_task(hub: Hub, interval: Duration, idle_timeout: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match hub.sweep_idle(OffsetDateTime::now_utc(), idle_timeout).await {
                    Ok(removed) if !removed.is_empty() => info!(count = removed.len(), "swept idle rooms"),
                    Ok(_) => {}
                    // the rows are still there, next tick retries
                    Err(err) => warn!(%err, "idle sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
