//! Email job repository.

use std::sync::Arc;

use crate::entities::{EmailJob, email_job};
use chrono::{DateTime, Utc};
use mailsched_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    sea_query::Expr,
};

use crate::entities::email_job::EmailJobStatus;

/// Email job repository for database operations.
#[derive(Clone)]
pub struct EmailJobRepository {
    db: Arc<DatabaseConnection>,
}

impl EmailJobRepository {
    /// Create a new email job repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an email job by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<email_job::Model>> {
        EmailJob::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new email job.
    pub async fn create(&self, model: email_job::ActiveModel) -> AppResult<email_job::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List jobs with the given status.
    ///
    /// Pending jobs come back by due time, oldest first. Terminal jobs come
    /// back most recent first.
    pub async fn list_by_status(&self, status: EmailJobStatus) -> AppResult<Vec<email_job::Model>> {
        let query = EmailJob::find().filter(email_job::Column::Status.eq(status));
        let query = match status {
            EmailJobStatus::Pending => query.order_by_asc(email_job::Column::ScheduledAt),
            EmailJobStatus::Sent => query.order_by_desc(email_job::Column::SentAt),
            EmailJobStatus::Failed => query.order_by_desc(email_job::Column::FailedAt),
        };

        query
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark a pending job as sent.
    ///
    /// Only a PENDING row is updated. A job that already reached a terminal
    /// status is returned unchanged; `None` means the job does not exist.
    pub async fn mark_sent(
        &self,
        id: &str,
        sent_at: DateTime<Utc>,
    ) -> AppResult<Option<email_job::Model>> {
        let result = EmailJob::update_many()
            .col_expr(
                email_job::Column::Status,
                Expr::value(EmailJobStatus::Sent),
            )
            .col_expr(email_job::Column::SentAt, Expr::value(sent_at))
            .col_expr(email_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(email_job::Column::Id.eq(id))
            .filter(email_job::Column::Status.eq(EmailJobStatus::Pending))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            tracing::debug!(job_id = %id, "Email job not pending, terminal update skipped");
        }
        self.find_by_id(id).await
    }

    /// Mark a pending job as failed with the transport error message.
    ///
    /// Only a PENDING row is updated. A job that already reached a terminal
    /// status is returned unchanged; `None` means the job does not exist.
    pub async fn mark_failed(
        &self,
        id: &str,
        failed_at: DateTime<Utc>,
        error_message: &str,
    ) -> AppResult<Option<email_job::Model>> {
        let result = EmailJob::update_many()
            .col_expr(
                email_job::Column::Status,
                Expr::value(EmailJobStatus::Failed),
            )
            .col_expr(email_job::Column::FailedAt, Expr::value(failed_at))
            .col_expr(email_job::Column::Error, Expr::value(error_message))
            .col_expr(email_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(email_job::Column::Id.eq(id))
            .filter(email_job::Column::Status.eq(EmailJobStatus::Pending))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            tracing::debug!(job_id = %id, "Email job not pending, terminal update skipped");
        }
        self.find_by_id(id).await
    }
}
