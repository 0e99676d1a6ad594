//! Fixed-interval poll loop, one per harvester
//!
//! Overlapping ticks are skipped rather than queued, so a slow tree or a slow
//! adapter simply delays the next poll. The loop follows the harvester's
//! configured interval across reconfigurations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::harvester::{HarvestError, Harvester};

/// Handle to a running poll loop
pub struct PollerHandle {
    harvester_id: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn harvester_id(&self) -> &str {
        &self.harvester_id
    }

    /// Stop the loop, waiting for an in-flight poll to finish first
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(harvester_id = %self.harvester_id, error = %e, "Poller task failed");
        }
    }
}

fn new_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Spawn the poll loop for `harvester` at its configured interval.
/// The first poll runs immediately.
pub fn spawn_poller(harvester: Arc<Harvester>) -> PollerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let harvester_id = harvester.id().to_string();

    let task = tokio::spawn(async move {
        let mut interval_rx = harvester.subscribe_poll_interval();
        let interval = *interval_rx.borrow_and_update();
        tracing::info!(
            harvester_id = %harvester.id(),
            interval_secs = interval.as_secs_f64(),
            "Poller started"
        );
        let mut ticker = new_ticker(Instant::now(), interval);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Ok(()) = interval_rx.changed() => {
                    let interval = *interval_rx.borrow_and_update();
                    tracing::info!(
                        harvester_id = %harvester.id(),
                        interval_secs = interval.as_secs_f64(),
                        "Poll interval changed"
                    );
                    ticker = new_ticker(Instant::now() + interval, interval);
                    continue;
                }
                _ = shutdown_rx.changed() => break,
            }
            tick_count += 1;

            match harvester.poll().await {
                Ok(report) => {
                    tracing::debug!(
                        harvester_id = %harvester.id(),
                        tick = tick_count,
                        events = report.events(),
                        idle = report.idle,
                        "Poll tick"
                    );
                }
                Err(HarvestError::NotRunning(_)) => {
                    tracing::debug!(harvester_id = %harvester.id(), tick = tick_count, "Harvester not running, skipping tick");
                }
                // Already logged by the harvester; retried next tick
                Err(_) => {}
            }

            if *shutdown_rx.borrow() {
                break;
            }
        }

        tracing::info!(harvester_id = %harvester.id(), "Poller stopped");
    });

    PollerHandle {
        harvester_id,
        shutdown,
        task,
    }
}
