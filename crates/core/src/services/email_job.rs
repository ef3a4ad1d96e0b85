//! Email job service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailsched_common::{AppError, AppResult, id::IdGenerator};
use mailsched_db::entities::email_job::{self, EmailJobStatus};
use serde::Deserialize;
use validator::{Validate, ValidateEmail, ValidationError};

use crate::services::job_store::{JobStore, NewEmailJob};

/// Input for scheduling an email.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEmailInput {
    /// Subject line.
    #[validate(length(min = 1, max = 998))]
    pub subject: String,
    /// HTML body.
    #[validate(length(min = 1))]
    pub body: String,
    /// Sender address.
    #[validate(email)]
    pub sender: String,
    /// Recipient addresses, at least one.
    #[validate(length(min = 1), custom(function = "validate_recipients"))]
    pub recipients: Vec<String>,
    /// When to send. Past times mean now.
    pub scheduled_at: DateTime<Utc>,
}

fn validate_recipients(recipients: &[String]) -> Result<(), ValidationError> {
    if recipients.iter().all(|r| r.validate_email()) {
        Ok(())
    } else {
        Err(ValidationError::new("email"))
    }
}

/// Service for creating and querying email jobs.
#[derive(Clone)]
pub struct EmailJobService {
    store: Arc<dyn JobStore>,
    id_gen: IdGenerator,
}

impl EmailJobService {
    /// Create a new email job service.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            id_gen: IdGenerator::new(),
        }
    }

    /// Record a new PENDING job.
    ///
    /// Dispatching it is up to the caller.
    pub async fn create(&self, input: ScheduleEmailInput) -> AppResult<email_job::Model> {
        input.validate()?;

        let recipients: Vec<String> = input
            .recipients
            .into_iter()
            .map(|r| r.trim().to_string())
            .collect();

        let job = self
            .store
            .create(NewEmailJob {
                id: self.id_gen.generate(),
                subject: input.subject,
                body: input.body,
                sender: input.sender.trim().to_string(),
                recipients,
                scheduled_at: input.scheduled_at,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            sender = %job.sender,
            scheduled_at = %job.scheduled_at,
            "Email job created"
        );

        Ok(job)
    }

    /// Get a job by ID.
    pub async fn get(&self, id: &str) -> AppResult<email_job::Model> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::EmailJobNotFound(id.to_string()))
    }

    /// Jobs waiting to be sent, soonest first.
    pub async fn list_scheduled(&self) -> AppResult<Vec<email_job::Model>> {
        self.store.list_by_status(EmailJobStatus::Pending).await
    }

    /// Sent jobs, most recent first.
    pub async fn list_sent(&self) -> AppResult<Vec<email_job::Model>> {
        self.store.list_by_status(EmailJobStatus::Sent).await
    }

    /// Failed jobs, most recent first.
    pub async fn list_failed(&self) -> AppResult<Vec<email_job::Model>> {
        self.store.list_by_status(EmailJobStatus::Failed).await
    }
}
