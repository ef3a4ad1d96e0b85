//! Email job endpoints.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use mailsched_common::{AppError, AppResult};
use mailsched_core::ScheduleEmailInput;
use mailsched_db::entities::email_job::{self, EmailJobStatus};
use serde::Serialize;

use crate::{response::ApiResponse, state::AppState};

// ==================== Request/Response Types ====================

/// Email job response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJobResponse {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub scheduled_at: String,
    pub status: EmailJobStatus,
    pub sent_at: Option<String>,
    pub failed_at: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl From<email_job::Model> for EmailJobResponse {
    fn from(j: email_job::Model) -> Self {
        let recipients = j.recipient_list();
        Self {
            id: j.id,
            subject: j.subject,
            body: j.body,
            sender: j.sender,
            recipients,
            scheduled_at: j.scheduled_at.to_rfc3339(),
            status: j.status,
            sent_at: j.sent_at.map(|dt| dt.to_rfc3339()),
            failed_at: j.failed_at.map(|dt| dt.to_rfc3339()),
            error: j.error,
            created_at: j.created_at.to_rfc3339(),
            updated_at: j.updated_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Schedule email response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEmailResponse {
    pub success: bool,
    pub email_job_id: String,
}

fn into_responses(jobs: Vec<email_job::Model>) -> Vec<EmailJobResponse> {
    jobs.into_iter().map(Into::into).collect()
}

// ==================== Handlers ====================

/// Create an email job and hand it to the dispatcher.
async fn schedule(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleEmailInput>, JsonRejection>,
) -> AppResult<ApiResponse<ScheduleEmailResponse>> {
    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let scheduled_at = input.scheduled_at;

    let job = state.email_job_service.create(input).await?;
    state
        .dispatcher
        .schedule_job(&job.id, scheduled_at)
        .await?;

    Ok(ApiResponse::ok(ScheduleEmailResponse {
        success: true,
        email_job_id: job.id,
    }))
}

/// List pending jobs, soonest first.
async fn scheduled(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<EmailJobResponse>>> {
    let jobs = state.email_job_service.list_scheduled().await?;
    Ok(ApiResponse::ok(into_responses(jobs)))
}

/// List sent jobs, most recent first.
async fn sent(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<EmailJobResponse>>> {
    let jobs = state.email_job_service.list_sent().await?;
    Ok(ApiResponse::ok(into_responses(jobs)))
}

/// List failed jobs, most recent first.
async fn failed(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<EmailJobResponse>>> {
    let jobs = state.email_job_service.list_failed().await?;
    Ok(ApiResponse::ok(into_responses(jobs)))
}

/// Show one job.
async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<EmailJobResponse>> {
    let job = state.email_job_service.get(&id).await?;
    Ok(ApiResponse::ok(job.into()))
}

// ==================== Router ====================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule", post(schedule))
        .route("/scheduled", get(scheduled))
        .route("/sent", get(sent))
        .route("/failed", get(failed))
        .route("/{id}", get(show))
}
