//! Background task that expires overdue jobs and evicts old ones.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::tracker::JobTracker;

/// Periodic `JobTracker::sweep` runner.
pub struct JobSweeper {
    tracker: JobTracker,
    interval: Duration,
}

/// Handle to stop a running sweeper.
#[derive(Debug)]
pub struct JobSweeperHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl JobSweeperHandle {
    /// Request shutdown and wait for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}

impl JobSweeper {
    pub fn new(tracker: JobTracker, interval: Duration) -> Self {
        Self { tracker, interval }
    }

    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(self) -> JobSweeperHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "job sweeper started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        match self.tracker.sweep() {
                            Ok(report) if report.timed_out + report.evicted > 0 => {
                                tracing::info!(timed_out = report.timed_out, evicted = report.evicted, "job sweep");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "job sweep failed"),
                        }
                    }
                }
            }

            tracing::info!("job sweeper stopped");
        });

        JobSweeperHandle { shutdown, join }
    }
}
