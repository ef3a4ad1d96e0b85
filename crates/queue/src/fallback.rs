//! In-process timer-driven scheduler.
//!
//! Used when the durable Redis queue is unreachable. Pending entries live in
//! a min-heap ordered by due time and are lost on restart.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsched_common::AppResult;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatch::{BackendKind, Scheduler};
use crate::processor::{JobProcessor, ProcessOutcome};

/// A job waiting for its due time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Email job to process.
    pub job_id: String,
    /// When the job becomes due.
    pub run_at: DateTime<Utc>,
    seq: u64,
}

// Reversed so that `BinaryHeap` pops the earliest entry first, oldest
// insertion first among equal due times.
impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    queue: Mutex<BinaryHeap<PendingEntry>>,
    seq: AtomicU64,
    wake: Notify,
    running: AtomicBool,
}

impl Inner {
    async fn add(&self, job_id: &str, run_at: DateTime<Utc>) {
        let entry = PendingEntry {
            job_id: job_id.to_string(),
            run_at,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        };

        let earliest = {
            let mut queue = self.queue.lock().await;
            let earliest = queue.peek().is_none_or(|head| entry > *head);
            queue.push(entry);
            earliest
        };

        if earliest {
            self.wake.notify_one();
        }
    }

    /// Pop the head entry if it is due.
    async fn claim_due(&self) -> Option<PendingEntry> {
        let mut queue = self.queue.lock().await;
        match queue.peek() {
            Some(head) if head.run_at <= Utc::now() => queue.pop(),
            _ => None,
        }
    }

    async fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.queue.lock().await.peek().map(|e| e.run_at)
    }
}

/// Single-process scheduler backed by a binary heap and one driver task.
pub struct FallbackScheduler {
    inner: Arc<Inner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackScheduler {
    /// Create the scheduler and spawn its driver task.
    #[must_use]
    pub fn start(processor: JobProcessor) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            wake: Notify::new(),
            running: AtomicBool::new(true),
        });

        let driver = tokio::spawn(drive(Arc::clone(&inner), processor));
        info!("In-process email scheduler started");

        Self {
            inner,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Queue `job_id` to be processed at `run_at`.
    pub async fn add(&self, job_id: &str, run_at: DateTime<Utc>) {
        self.inner.add(job_id, run_at).await;
        debug!(job_id = %job_id, run_at = %run_at, "Email job queued in memory");
    }

    /// Snapshot of waiting entries, earliest first.
    pub async fn pending(&self) -> Vec<PendingEntry> {
        self.inner.queue.lock().await.clone().into_sorted_vec().into_iter().rev().collect()
    }
}

/// Driver loop: sleep until the head entry is due, process it, repeat.
async fn drive(inner: Arc<Inner>, processor: JobProcessor) {
    while inner.running.load(AtomicOrdering::SeqCst) {
        let Some(run_at) = inner.next_run_at().await else {
            inner.wake.notified().await;
            continue;
        };

        // Negative durations mean the entry is overdue
        if let Ok(wait) = (run_at - Utc::now()).to_std() {
            if !wait.is_zero() {
                tokio::select! {
                    () = inner.wake.notified() => continue,
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }

        let Some(entry) = inner.claim_due().await else {
            continue;
        };

        match processor.process(&entry.job_id).await {
            Ok(ProcessOutcome::RateLimited { retry_at }) => {
                inner.add(&entry.job_id, retry_at).await;
            }
            Ok(outcome) => {
                debug!(job_id = %entry.job_id, outcome = ?outcome, "Email job processed");
            }
            Err(e) => {
                error!(job_id = %entry.job_id, error = %e, "Failed to process email job");
            }
        }
    }

    debug!("In-process email scheduler stopped");
}

#[async_trait]
impl Scheduler for FallbackScheduler {
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    async fn schedule(&self, job_id: &str, run_at: DateTime<Utc>) -> AppResult<()> {
        self.add(job_id, run_at).await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.running.store(false, AtomicOrdering::SeqCst);
        self.inner.wake.notify_one();
        if let Some(handle) = self.driver.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "In-process email scheduler task failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(job_id: &str, run_at: DateTime<Utc>, seq: u64) -> PendingEntry {
        PendingEntry {
            job_id: job_id.to_string(),
            run_at,
            seq,
        }
    }

    #[test]
    fn test_heap_pops_earliest_first() {
        let now = Utc::now();
        let mut heap = BinaryHeap::new();
        heap.push(entry("late", now + Duration::minutes(10), 0));
        heap.push(entry("soon", now + Duration::seconds(1), 1));
        heap.push(entry("overdue", now - Duration::seconds(5), 2));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|e| e.job_id).collect();
        assert_eq!(order, vec!["overdue", "soon", "late"]);
    }

    #[test]
    fn test_heap_ties_keep_insertion_order() {
        let now = Utc::now();
        let mut heap = BinaryHeap::new();
        heap.push(entry("second", now, 7));
        heap.push(entry("first", now, 3));
        heap.push(entry("third", now, 9));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|e| e.job_id).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }
}
