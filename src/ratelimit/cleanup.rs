//! Scheduled removal of dead counters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::limiter::RateLimiter;

/// Periodically deletes counters whose window has elapsed.
#[derive(Debug)]
pub struct CleanupJob {
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl CleanupJob {
    /// Create a job running every `interval`.
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        Self { limiter, interval }
    }

    /// Run cleanup passes until `shutdown` resolves.
    ///
    /// The first pass runs immediately. A failed pass is logged and retried
    /// on the next tick. Returns the total number of rows removed.
    pub async fn run_until<F>(self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval = ?self.interval, "Starting rate limit cleanup job");

        let mut total = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(total_removed = total, "Rate limit cleanup job stopped");
                    return total;
                }
                _ = ticker.tick() => {
                    match self.limiter.cleanup_expired().await {
                        Ok(removed) => total += removed,
                        Err(e) => error!(error = %e, "Rate limit cleanup pass failed"),
                    }
                }
            }
        }
    }
}
