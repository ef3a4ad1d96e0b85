//! Send attempt for a single email job.
//!
//! Both schedulers hand due job ids to [`JobProcessor::process`], which
//! decides whether the job is sent now, rescheduled, or dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailsched_common::AppResult;
use mailsched_core::{JobStore, JobUpdate, MailSender, OutgoingMail};
use mailsched_db::entities::email_job::EmailJobStatus;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rate_limit::SenderRateLimiter;

/// Result of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The message was handed to the transport and the job is SENT.
    Sent,
    /// The transport rejected the message and the job is FAILED.
    Failed(String),
    /// The sender's hourly limit is reached; try again at `retry_at`.
    RateLimited {
        /// Earliest time the sender has room again.
        retry_at: DateTime<Utc>,
    },
    /// Nothing to do: the job is missing or no longer PENDING.
    Skipped,
    /// Another attempt for the same job is running.
    InFlight,
}

/// Removes the job id from the in-flight set when dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Shared processing logic for scheduled email jobs.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    mailer: Arc<dyn MailSender>,
    limiter: SenderRateLimiter,
    min_delay: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
    last_sent: Arc<tokio::sync::Mutex<HashMap<String, Instant>>>,
}

impl JobProcessor {
    /// Create a new processor.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        mailer: Arc<dyn MailSender>,
        limiter: SenderRateLimiter,
        min_delay: Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            limiter,
            min_delay,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_sent: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    fn claim(&self, job_id: &str) -> Option<InFlightGuard> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(job_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            job_id: job_id.to_string(),
        })
    }

    /// Wait for the sender's next send slot.
    ///
    /// The slot is reserved under the lock before sleeping, so concurrent
    /// attempts for one sender each get their own slot `min_delay` apart.
    async fn wait_for_spacing(&self, sender: &str) {
        let ready_at = {
            let mut last_sent = self.last_sent.lock().await;
            let now = Instant::now();
            let ready_at = last_sent
                .get(sender)
                .map_or(now, |last| (*last + self.min_delay).max(now));
            last_sent.insert(sender.to_string(), ready_at);
            ready_at
        };

        let now = Instant::now();
        if ready_at > now {
            debug!(sender = %sender, wait_ms = (ready_at - now).as_millis(), "Waiting for send spacing");
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Attempt to send the job with the given id.
    ///
    /// Errors come from the job store only. A transport failure is recorded
    /// on the job and reported as [`ProcessOutcome::Failed`].
    pub async fn process(&self, job_id: &str) -> AppResult<ProcessOutcome> {
        let Some(_guard) = self.claim(job_id) else {
            debug!(job_id = %job_id, "Email job already being processed");
            return Ok(ProcessOutcome::InFlight);
        };

        let Some(job) = self.store.get(job_id).await? else {
            warn!(job_id = %job_id, "Email job not found, dropping");
            return Ok(ProcessOutcome::Skipped);
        };

        if job.status != EmailJobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "Email job already finished");
            return Ok(ProcessOutcome::Skipped);
        }

        self.wait_for_spacing(&job.sender).await;

        if !self.limiter.check_and_increment(&job.sender).await {
            let retry_at = self.limiter.next_available_time(&job.sender).await;
            info!(job_id = %job_id, sender = %job.sender, retry_at = %retry_at, "Sender over hourly limit, rescheduling");
            return Ok(ProcessOutcome::RateLimited { retry_at });
        }

        let mail = OutgoingMail {
            from: job.sender.clone(),
            to: job.recipient_list(),
            subject: job.subject.clone(),
            body: job.body.clone(),
        };

        match self.mailer.send(mail).await {
            Ok(()) => {
                let sent_at = Instant::now();
                self.last_sent
                    .lock()
                    .await
                    .entry(job.sender.clone())
                    .and_modify(|slot| *slot = (*slot).max(sent_at))
                    .or_insert(sent_at);
                self.store
                    .update(job_id, JobUpdate::Sent { at: Utc::now() })
                    .await?;
                info!(job_id = %job_id, sender = %job.sender, "Email sent");
                Ok(ProcessOutcome::Sent)
            }
            Err(e) => {
                let error = e.to_string();
                self.store
                    .update(
                        job_id,
                        JobUpdate::Failed {
                            at: Utc::now(),
                            error: error.clone(),
                        },
                    )
                    .await?;
                warn!(job_id = %job_id, sender = %job.sender, error = %error, "Email send failed");
                Ok(ProcessOutcome::Failed(error))
            }
        }
    }
}
