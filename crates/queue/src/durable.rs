//! Durable scheduler backed by apalis and Redis.
//!
//! Delayed jobs are stored in Redis and survive restarts. Workers run the
//! same [`JobProcessor`] as the in-process scheduler.

use std::time::Duration;

use apalis::prelude::*;
use apalis_redis::RedisStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsched_common::{AppError, AppResult};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{BackendKind, Scheduler};
use crate::jobs::SendEmailJob;
use crate::processor::{JobProcessor, ProcessOutcome};

/// Context for the send email worker.
#[derive(Clone)]
pub struct SendEmailContext {
    /// Shared send logic.
    pub processor: JobProcessor,
    /// Queue used to reschedule rate-limited jobs.
    pub storage: RedisStorage<SendEmailJob>,
}

/// Unix second at which a job due at `run_at` may run.
///
/// apalis schedules with second precision, so partial seconds round up.
fn schedule_timestamp(run_at: DateTime<Utc>) -> i64 {
    let secs = run_at.timestamp();
    if run_at.timestamp_subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Submit `job` to run at `run_at`, immediately when already due.
async fn submit(
    storage: &RedisStorage<SendEmailJob>,
    job: SendEmailJob,
    run_at: DateTime<Utc>,
) -> AppResult<()> {
    let mut storage = storage.clone();
    if run_at <= Utc::now() {
        storage
            .push(job)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to queue job: {e}")))?;
    } else {
        storage
            .schedule(job, schedule_timestamp(run_at))
            .await
            .map_err(|e| AppError::Queue(format!("Failed to schedule job: {e}")))?;
    }
    Ok(())
}

fn job_failed(e: AppError) -> Error {
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
    Error::Failed(boxed.into())
}

/// Worker function for sending scheduled emails.
///
/// A transport failure is recorded on the job and not retried by the queue.
///
/// # Errors
/// Returns an error if the job store or the queue is unreachable.
pub async fn send_email_worker(job: SendEmailJob, ctx: Data<SendEmailContext>) -> Result<(), Error> {
    debug!(job_id = %job.email_job_id, "Processing email job");

    match ctx.processor.process(&job.email_job_id).await {
        Ok(ProcessOutcome::RateLimited { retry_at }) => {
            submit(&ctx.storage, job.clone(), retry_at)
                .await
                .map_err(|e| {
                    error!(job_id = %job.email_job_id, error = %e, "Failed to reschedule email job");
                    job_failed(e)
                })
        }
        Ok(outcome) => {
            debug!(job_id = %job.email_job_id, outcome = ?outcome, "Email job processed");
            Ok(())
        }
        Err(e) => {
            error!(job_id = %job.email_job_id, error = %e, "Failed to process email job");
            Err(job_failed(e))
        }
    }
}

struct WorkerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Scheduler that delegates delayed execution to a Redis-backed apalis queue.
pub struct DurableScheduler {
    storage: RedisStorage<SendEmailJob>,
    workers: Mutex<Option<WorkerHandle>>,
}

impl DurableScheduler {
    /// Connect to the queue's Redis instance.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection does not
    /// succeed within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Queue(format!("Invalid Redis URL: {e}")))?;

        let conn = tokio::time::timeout(timeout, redis::aio::ConnectionManager::new(client))
            .await
            .map_err(|_| AppError::Queue(format!("Redis connection timed out after {timeout:?}")))?
            .map_err(|e| AppError::Queue(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self {
            storage: RedisStorage::<SendEmailJob>::new(conn),
            workers: Mutex::new(None),
        })
    }

    /// Spawn the worker pool.
    pub async fn start_workers(&self, processor: JobProcessor, concurrency: usize) {
        let ctx = SendEmailContext {
            processor,
            storage: self.storage.clone(),
        };
        let storage = self.storage.clone();
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let monitor = Monitor::new().register({
                WorkerBuilder::new("send-email")
                    .enable_tracing()
                    .concurrency(concurrency.max(1))
                    .data(ctx)
                    .backend(storage)
                    .build_fn(send_email_worker)
            });

            let signal = async move {
                if stopped.await.is_err() {
                    debug!("Email worker stop handle dropped");
                }
                Ok::<(), std::io::Error>(())
            };

            if let Err(e) = monitor.run_with_signal(signal).await {
                error!(error = %e, "Email worker monitor failed");
            }
        });

        info!(concurrency, "Email workers started");
        *self.workers.lock().await = Some(WorkerHandle { stop, task });
    }
}

#[async_trait]
impl Scheduler for DurableScheduler {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn schedule(&self, job_id: &str, run_at: DateTime<Utc>) -> AppResult<()> {
        submit(&self.storage, SendEmailJob::new(job_id), run_at).await?;
        debug!(job_id = %job_id, run_at = %run_at, "Email job queued in Redis");
        Ok(())
    }

    async fn shutdown(&self) {
        let Some(handle) = self.workers.lock().await.take() else {
            return;
        };

        if handle.stop.send(()).is_err() {
            warn!("Email worker monitor already stopped");
        }
        if let Err(e) = handle.task.await {
            error!(error = %e, "Email worker task failed");
        }
    }
}
