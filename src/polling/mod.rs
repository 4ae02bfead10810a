use crate::metrics;
use crate::reconcile::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs a reconciliation cycle on a fixed interval until shut down
pub struct Scheduler {
    interval: Duration,
    reconciler: Arc<Reconciler>,
}

impl Scheduler {
    pub fn new(interval: Duration, reconciler: Arc<Reconciler>) -> Self {
        Self {
            interval,
            reconciler,
        }
    }

    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// The first cycle starts immediately. A tick that lands while a cycle is
    /// still running is dropped rather than queued.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting scheduler (interval: {}s)",
            self.interval.as_secs_f64()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            match self.reconciler.run_cycle(&shutdown).await {
                Some(report) => {
                    metrics::mark_ready();
                    debug!(
                        "Cycle took {}ms",
                        (report.finished_at - report.started_at).num_milliseconds()
                    );
                },
                None => debug!("Tick skipped"),
            }
        }

        info!("Scheduler stopped");
    }
}
