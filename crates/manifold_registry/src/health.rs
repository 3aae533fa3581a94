//! Background health monitor: one actor ticking on a configured interval,
//! one short-lived probe per connected peer per tick.

use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to the running monitor; dropping it does not stop the actor,
/// cancellation does.
pub(crate) struct HealthHandle {
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

impl HealthHandle {
    pub fn stop(self) {
        self.token.cancel();
        self.task.abort();
    }
}

pub(crate) fn spawn_monitor(
    registry: Arc<Registry>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::debug!("health monitor started (interval {:?})", interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            registry.run_health_pass(&token).await;
        }

        tracing::debug!("health monitor stopped");
    })
}
