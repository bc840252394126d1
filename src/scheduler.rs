//! Fixed-rate statistics flush
//!
//! The first flush happens one period after start. On shutdown the timer is
//! stopped, pending violations are drained and a final flush runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::blocklist::{Blocklist, FlushReport};
use crate::recorder::ViolationRecorder;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct StatisticsScheduler {
    blocklist: Arc<Blocklist>,
    task: JoinHandle<()>,
}

impl StatisticsScheduler {
    pub fn spawn(blocklist: Arc<Blocklist>, period: Duration) -> Self {
        let flushed = blocklist.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = flushed.flush();
                debug!(
                    blocked_requests = report.blocked_requests,
                    blocked_ip_requests = report.blocked_ip_requests,
                    "Scheduled statistics flush"
                );
            }
        });

        Self { blocklist, task }
    }

    /// Stops the timer and performs the final, best-effort flush.
    pub async fn shutdown(self, recorder: &ViolationRecorder) -> FlushReport {
        self.task.abort();

        match tokio::time::timeout(DRAIN_TIMEOUT, recorder.sync()).await {
            Ok(true) => {}
            Ok(false) => debug!("Violation worker already stopped"),
            Err(_) => warn!("Timed out draining violation queue before final flush"),
        }

        self.blocklist.flush()
    }
}
