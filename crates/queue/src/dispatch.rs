//! Dispatch facade.
//!
//! Callers hand a job id and due time to [`Dispatcher::schedule_job`] and do
//! not care which backend runs it. The backend is chosen once at startup.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsched_common::{AppResult, Config};
use mailsched_core::JobStore;
use mailsched_db::entities::email_job::EmailJobStatus;
use serde::Serialize;
use tracing::{info, warn};

use crate::durable::DurableScheduler;
use crate::fallback::FallbackScheduler;
use crate::processor::JobProcessor;

/// Which scheduler backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Redis-backed apalis queue.
    Durable,
    /// In-process timer queue.
    Fallback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// A backend that runs jobs at their due time.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Backend identity.
    fn kind(&self) -> BackendKind;

    /// Arrange for `job_id` to be processed at `run_at`.
    async fn schedule(&self, job_id: &str, run_at: DateTime<Utc>) -> AppResult<()>;

    /// Stop processing.
    async fn shutdown(&self) {}
}

/// Single entry point for scheduling email jobs.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn Scheduler>,
}

impl Dispatcher {
    /// Create a dispatcher over an already running backend.
    #[must_use]
    pub fn new(backend: Arc<dyn Scheduler>) -> Self {
        Self { backend }
    }

    /// Pick and start a backend.
    ///
    /// Uses the durable queue when Redis answers within the configured
    /// timeout, the in-process scheduler otherwise.
    pub async fn start(config: &Config, processor: JobProcessor) -> Self {
        match DurableScheduler::connect(&config.redis.url, config.redis.connect_timeout()).await {
            Ok(durable) => {
                durable
                    .start_workers(processor, config.queue.worker_concurrency)
                    .await;
                info!("Using Redis job queue for email dispatch");
                Self::new(Arc::new(durable))
            }
            Err(e) => {
                warn!(error = %e, "Redis job queue unavailable, using in-process scheduler");
                Self::new(Arc::new(FallbackScheduler::start(processor)))
            }
        }
    }

    /// Schedule a job for delivery at `scheduled_at`.
    ///
    /// # Errors
    /// Returns [`mailsched_common::AppError::Queue`] when the durable queue
    /// rejects the submission.
    pub async fn schedule_job(&self, job_id: &str, scheduled_at: DateTime<Utc>) -> AppResult<()> {
        self.backend.schedule(job_id, scheduled_at).await
    }

    /// Active backend.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Re-queue PENDING jobs from the store.
    ///
    /// Only the in-process backend loses its queue on restart, so this is a
    /// no-op for the durable backend. Returns the number of jobs re-queued.
    pub async fn recover_pending(&self, store: &dyn JobStore) -> AppResult<usize> {
        if self.backend.kind() != BackendKind::Fallback {
            return Ok(0);
        }

        let pending = store.list_by_status(EmailJobStatus::Pending).await?;
        for job in &pending {
            self.backend
                .schedule(&job.id, job.scheduled_at.with_timezone(&Utc))
                .await?;
        }

        if !pending.is_empty() {
            info!(count = pending.len(), "Recovered pending email jobs");
        }
        Ok(pending.len())
    }

    /// Stop the active backend.
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
        info!(backend = %self.backend.kind(), "Email dispatch stopped");
    }
}
