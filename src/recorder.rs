//! Fire-and-forget violation recording
//!
//! Request handlers enqueue violations without waiting. A single worker task
//! drains the bounded queue into the [`Blocklist`], so recordings are applied
//! in order relative to each other and to statistics flushes. When the queue
//! is full the violation is dropped and counted rather than stalling the
//! request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blocklist::Blocklist;

#[derive(Debug)]
enum Command {
    Record { category: String, ip: String },
    Sync(oneshot::Sender<()>),
}

/// Cloneable handle to the recording queue.
#[derive(Clone)]
pub struct ViolationRecorder {
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl ViolationRecorder {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(blocklist: Arc<Blocklist>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Record { category, ip } => {
                        let outcome = blocklist.record_violation(&category, &ip);
                        debug!(category = %category, ip = %ip, ?outcome, "Violation recorded");
                    }
                    Command::Sync(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        let recorder = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (recorder, worker)
    }

    /// Enqueues a violation and returns immediately.
    pub fn record(&self, category: impl Into<String>, ip: impl Into<String>) {
        let command = Command::Record {
            category: category.into(),
            ip: ip.into(),
        };
        if let Err(e) = self.tx.try_send(command) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Violation queue full, dropping violation")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("Violation worker stopped, dropping violation")
                }
            }
        }
    }

    /// Waits until every violation enqueued before this call is applied.
    ///
    /// Returns false when the worker is gone.
    pub async fn sync(&self) -> bool {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Sync(done)).await.is_err() {
            return false;
        }
        wait.await.is_ok()
    }

    /// Violations discarded because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::BlocklistSettings;

    #[tokio::test]
    async fn test_recorded_violations_reach_blocklist() {
        let blocklist = Arc::new(Blocklist::default());
        let (recorder, _worker) = ViolationRecorder::spawn(blocklist.clone(), 16);

        recorder.record("PHP", "10.0.0.1");
        recorder.record("jndi", "10.0.0.1");
        assert!(recorder.sync().await);

        assert_eq!(blocklist.reason_count("php"), 1);
        assert_eq!(blocklist.reason_count("jndi"), 1);
        assert_eq!(blocklist.conspicuous_count("10.0.0.1"), 2);
        assert_eq!(recorder.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let blocklist = Arc::new(Blocklist::default());
        let (tx, _rx) = mpsc::channel(1);
        let recorder = ViolationRecorder {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        recorder.record("php", "10.0.0.1");
        recorder.record("php", "10.0.0.1");
        recorder.record("php", "10.0.0.1");

        assert_eq!(recorder.dropped(), 2);
        assert_eq!(blocklist.reason_count("php"), 0);
    }

    #[tokio::test]
    async fn test_sync_after_worker_stopped() {
        let blocklist = Arc::new(Blocklist::default());
        let (recorder, worker) = ViolationRecorder::spawn(blocklist, 4);
        worker.abort();
        let _ = worker.await;

        assert!(!recorder.sync().await);
        recorder.record("php", "10.0.0.1");
        assert_eq!(recorder.dropped(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_promote_ip() {
        let blocklist = Arc::new(Blocklist::new(BlocklistSettings::default()));
        let (recorder, _worker) = ViolationRecorder::spawn(blocklist.clone(), 1024);

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let recorder = recorder.clone();
                tokio::spawn(async move { recorder.record("sql", "10.0.0.5") })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(recorder.sync().await);

        assert_eq!(blocklist.conspicuous_count("10.0.0.5"), 10);
        assert!(blocklist.is_blocked("10.0.0.5"));
    }
}
