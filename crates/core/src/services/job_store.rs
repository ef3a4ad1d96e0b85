//! Email job record store.
//!
//! The dispatch queue reads and finalizes jobs through [`JobStore`]. The
//! Postgres repository is the production implementation; [`MemoryJobStore`]
//! keeps records in process memory when no database is reachable and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsched_common::AppResult;
use mailsched_db::entities::email_job::{self, EmailJobStatus};
use mailsched_db::repositories::EmailJobRepository;
use sea_orm::Set;
use serde_json::json;
use tokio::sync::RwLock;

/// Fields of a job at creation time.
#[derive(Debug, Clone)]
pub struct NewEmailJob {
    /// Job ID.
    pub id: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub body: String,
    /// Sender address, also the rate-limit key.
    pub sender: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Requested due time.
    pub scheduled_at: DateTime<Utc>,
}

/// Terminal transition applied to a pending job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// The transport accepted the message.
    Sent {
        /// When it was accepted.
        at: DateTime<Utc>,
    },
    /// The transport rejected the message.
    Failed {
        /// When it was rejected.
        at: DateTime<Utc>,
        /// Transport error message.
        error: String,
    },
}

/// Persistent record of email jobs.
///
/// `update` only transitions a PENDING job. For a job that is already
/// terminal it is a no-op that returns the current record. `None` means the
/// job does not exist.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new PENDING job.
    async fn create(&self, job: NewEmailJob) -> AppResult<email_job::Model>;

    /// Fetch a job by id.
    async fn get(&self, id: &str) -> AppResult<Option<email_job::Model>>;

    /// Apply a terminal transition.
    async fn update(&self, id: &str, update: JobUpdate) -> AppResult<Option<email_job::Model>>;

    /// List jobs with the given status.
    ///
    /// PENDING by due time ascending, SENT by `sent_at` descending, FAILED by
    /// `failed_at` descending.
    async fn list_by_status(&self, status: EmailJobStatus) -> AppResult<Vec<email_job::Model>>;
}

#[async_trait]
impl JobStore for EmailJobRepository {
    async fn create(&self, job: NewEmailJob) -> AppResult<email_job::Model> {
        let model = email_job::ActiveModel {
            id: Set(job.id),
            subject: Set(job.subject),
            body: Set(job.body),
            sender: Set(job.sender),
            recipients: Set(json!(job.recipients)),
            scheduled_at: Set(job.scheduled_at.into()),
            status: Set(EmailJobStatus::Pending),
            sent_at: Set(None),
            failed_at: Set(None),
            error: Set(None),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };
        Self::create(self, model).await
    }

    async fn get(&self, id: &str) -> AppResult<Option<email_job::Model>> {
        self.find_by_id(id).await
    }

    async fn update(&self, id: &str, update: JobUpdate) -> AppResult<Option<email_job::Model>> {
        match update {
            JobUpdate::Sent { at } => self.mark_sent(id, at).await,
            JobUpdate::Failed { at, error } => self.mark_failed(id, at, &error).await,
        }
    }

    async fn list_by_status(&self, status: EmailJobStatus) -> AppResult<Vec<email_job::Model>> {
        Self::list_by_status(self, status).await
    }
}

/// In-process job store.
///
/// Records are lost on restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, email_job::Model>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewEmailJob) -> AppResult<email_job::Model> {
        let now = Utc::now();
        let model = email_job::Model {
            id: job.id,
            subject: job.subject,
            body: job.body,
            sender: job.sender,
            recipients: json!(job.recipients),
            scheduled_at: job.scheduled_at.into(),
            status: EmailJobStatus::Pending,
            sent_at: None,
            failed_at: None,
            error: None,
            created_at: now.into(),
            updated_at: None,
        };

        self.jobs
            .write()
            .await
            .insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn get(&self, id: &str) -> AppResult<Option<email_job::Model>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: JobUpdate) -> AppResult<Option<email_job::Model>> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };

        if job.status != EmailJobStatus::Pending {
            tracing::debug!(job_id = %id, status = %job.status, "Email job not pending, terminal update skipped");
            return Ok(Some(job.clone()));
        }

        match update {
            JobUpdate::Sent { at } => {
                job.status = EmailJobStatus::Sent;
                job.sent_at = Some(at.into());
            }
            JobUpdate::Failed { at, error } => {
                job.status = EmailJobStatus::Failed;
                job.failed_at = Some(at.into());
                job.error = Some(error);
            }
        }
        job.updated_at = Some(Utc::now().into());

        Ok(Some(job.clone()))
    }

    async fn list_by_status(&self, status: EmailJobStatus) -> AppResult<Vec<email_job::Model>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();

        match status {
            EmailJobStatus::Pending => jobs.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at)),
            EmailJobStatus::Sent => jobs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at)),
            EmailJobStatus::Failed => jobs.sort_by(|a, b| b.failed_at.cmp(&a.failed_at)),
        }

        Ok(jobs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_job(id: &str, scheduled_at: DateTime<Utc>) -> NewEmailJob {
        NewEmailJob {
            id: id.to_string(),
            subject: "Reminder".to_string(),
            body: "<p>Don't forget</p>".to_string(),
            sender: "team@example.com".to_string(),
            recipients: vec!["one@example.com".to_string(), "two@example.com".to_string()],
            scheduled_at,
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("a", Utc::now())).await.unwrap();

        assert_eq!(job.status, EmailJobStatus::Pending);
        assert_eq!(
            job.recipient_list(),
            vec!["one@example.com", "two@example.com"]
        );
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_update_applies_once() {
        let store = MemoryJobStore::new();
        store.create(new_job("a", Utc::now())).await.unwrap();

        let sent_at = Utc::now();
        let sent = store
            .update("a", JobUpdate::Sent { at: sent_at })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.status, EmailJobStatus::Sent);

        let again = store
            .update(
                "a",
                JobUpdate::Failed {
                    at: Utc::now(),
                    error: "late failure".to_string(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.status, EmailJobStatus::Sent);
        assert!(again.error.is_none());
        assert!(again.failed_at.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let store = MemoryJobStore::new();
        let result = store
            .update("ghost", JobUpdate::Sent { at: Utc::now() })
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_list_by_status_ordering() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store
            .create(new_job("late", now + Duration::hours(2)))
            .await
            .unwrap();
        store
            .create(new_job("early", now + Duration::minutes(5)))
            .await
            .unwrap();
        store.create(new_job("s1", now)).await.unwrap();
        store.create(new_job("s2", now)).await.unwrap();

        store
            .update("s1", JobUpdate::Sent { at: now })
            .await
            .unwrap();
        store
            .update(
                "s2",
                JobUpdate::Sent {
                    at: now + Duration::seconds(10),
                },
            )
            .await
            .unwrap();

        let pending = store.list_by_status(EmailJobStatus::Pending).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        let sent = store.list_by_status(EmailJobStatus::Sent).await.unwrap();
        let ids: Vec<_> = sent.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);

        assert!(
            store
                .list_by_status(EmailJobStatus::Failed)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
