/// Background polling worker
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::info;

pub mod checkpoint;
pub mod downloader;
pub mod processor;

pub use checkpoint::CheckpointStore;
pub use processor::{ApiFactory, CycleStats, FinancialProcessor};

/// Drives the processor on a fixed interval until shutdown.
pub struct PollScheduler {
    processor: Arc<FinancialProcessor>,
    interval_secs: u64,
}

impl PollScheduler {
    pub fn new(processor: Arc<FinancialProcessor>, interval_secs: u64) -> Self {
        Self {
            processor,
            interval_secs,
        }
    }

    /// Run cycles until the shutdown signal flips. A cycle in flight
    /// finishes before the loop exits; only the wait is interruptible.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        // A slow cycle should not cause a burst of catch-up cycles
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval_secs, "Polling scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.processor.run_cycle(&shutdown).await;
                }
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again; treat
                    // the closed channel as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Polling scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}
