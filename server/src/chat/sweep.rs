//! Background inactivity sweep for the room directory.
//!
//! Spawns a tokio task that periodically retires rooms whose members have
//! been silent for longer than the configured idle timeout.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::chat::hub::Hub;

/// Spawn the sweep loop. Abort the returned handle to stop it.
///
/// Runs `Hub::sweep_idle` every `interval` (default 60 seconds); the first
/// sweep happens one full interval after start.
pub fn spawn_room_sweeper(hub: Hub, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let evicted = hub.sweep_idle().await;
            if evicted.is_empty() {
                tracing::debug!(rooms = hub.room_count(), "Room sweep: nothing idle");
            } else {
                tracing::info!(
                    evicted = evicted.len(),
                    remaining = hub.room_count(),
                    "Room sweep: retired idle rooms"
                );
            }
        }
    })
}
