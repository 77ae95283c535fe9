//! Background eviction of expired terminal jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::metrics;
use crate::registry::JobRegistry;

/// Periodically removes terminal jobs past their retention deadline.
pub struct RetentionSweeper {
    registry: Arc<JobRegistry>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<JobRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Spawn the sweep loop. It exits once `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting retention sweeper (interval: {:?})", self.interval);

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep(&self.registry);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Retention sweeper stopped");
        })
    }
}

/// Run one eviction pass. Returns how many jobs were removed.
pub fn sweep(registry: &JobRegistry) -> usize {
    let evicted = registry.evict_expired(Utc::now());
    if !evicted.is_empty() {
        info!(count = evicted.len(), "Evicted expired jobs");
        metrics::record_jobs_evicted(evicted.len());
    }
    evicted.len()
}
