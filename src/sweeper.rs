//! Background release of lapsed reservations.

use std::time::Duration;

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{services::reservation_service, state::AppState};

pub struct ExpirySweeper {
    state: AppState,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(state: AppState) -> Self {
        let interval = Duration::from_secs(state.config.sweep_interval_secs.max(1));
        Self { state, interval }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Sweep on every tick until `shutdown` is cancelled. A failed pass is
    /// logged and retried on the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(every_secs = self.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "expiry sweep failed");
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }

    pub async fn sweep_once(&self) -> anyhow::Result<reservation_service::ExpirySummary> {
        let summary = reservation_service::expire_stale(&self.state).await?;
        if summary.clamped > 0 {
            tracing::warn!(clamped = summary.clamped, "expiry released more than was reserved");
        }
        Ok(summary)
    }
}
