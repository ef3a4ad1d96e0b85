//! API integration tests.
//!
//! These tests drive the router with an in-memory job store and the
//! in-process scheduler.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Utc};
use mailsched_api::{AppState, app_router};
use mailsched_common::{AppError, AppResult};
use mailsched_core::{EmailJobService, LogMailSender, MemoryJobStore};
use mailsched_queue::{
    BackendKind, Dispatcher, FallbackScheduler, JobProcessor, MemoryCounterStore, Scheduler,
    SenderRateLimiter,
};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Scheduler whose queue is always down.
struct UnreachableQueue;

#[async_trait]
impl Scheduler for UnreachableQueue {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn schedule(&self, _job_id: &str, _run_at: DateTime<Utc>) -> AppResult<()> {
        Err(AppError::Queue("connection refused".to_string()))
    }
}

fn create_test_router() -> Router {
    let store = Arc::new(MemoryJobStore::new());
    let limiter = SenderRateLimiter::new(Some(Arc::new(MemoryCounterStore::new())), 100, "test");
    let processor = JobProcessor::new(
        store.clone(),
        Arc::new(LogMailSender),
        limiter,
        Duration::ZERO,
    );
    let dispatcher = Dispatcher::new(Arc::new(FallbackScheduler::start(processor)));
    let state = AppState::new(EmailJobService::new(store), dispatcher);
    app_router().with_state(state)
}

fn create_router_with_unreachable_queue() -> Router {
    let store = Arc::new(MemoryJobStore::new());
    let dispatcher = Dispatcher::new(Arc::new(UnreachableQueue));
    let state = AppState::new(EmailJobService::new(store), dispatcher);
    app_router().with_state(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn schedule_body(scheduled_at: DateTime<Utc>) -> Value {
    json!({
        "subject": "Quarterly update",
        "body": "<p>Results inside</p>",
        "sender": "ceo@example.com",
        "recipients": ["board@example.com", "staff@example.com"],
        "scheduledAt": scheduled_at.to_rfc3339(),
    })
}

#[tokio::test]
async fn test_ping() {
    let app = create_test_router();
    let (status, body) = send(&app, get("/ping")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["dispatch"], json!("fallback"));
}

#[tokio::test]
async fn test_schedule_future_email_is_listed_as_scheduled() {
    let app = create_test_router();
    let at = Utc::now() + chrono::Duration::hours(1);

    let (status, body) = send(&app, post_json("/api/emails/schedule", &schedule_body(at))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], json!(true));
    let id = body["data"]["emailJobId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get("/api/emails/scheduled")).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], json!(id));
    assert_eq!(jobs[0]["status"], json!("PENDING"));
    assert_eq!(
        jobs[0]["recipients"],
        json!(["board@example.com", "staff@example.com"])
    );

    let (status, body) = send(&app, get(&format!("/api/emails/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subject"], json!("Quarterly update"));
}

#[tokio::test]
async fn test_schedule_due_email_is_sent() {
    let app = create_test_router();
    let at = Utc::now() - chrono::Duration::seconds(1);

    let (status, body) = send(&app, post_json("/api/emails/schedule", &schedule_body(at))).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["emailJobId"].as_str().unwrap().to_string();

    let mut sent = false;
    for _ in 0..100 {
        let (_, body) = send(&app, get("/api/emails/sent")).await;
        if body["data"]
            .as_array()
            .is_some_and(|jobs| jobs.iter().any(|j| j["id"] == json!(id)))
        {
            sent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(sent, "job was not sent in time");

    let (_, body) = send(&app, get(&format!("/api/emails/{id}"))).await;
    assert_eq!(body["data"]["status"], json!("SENT"));
    assert!(body["data"]["sentAt"].is_string());

    let (_, body) = send(&app, get("/api/emails/failed")).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_schedule_missing_field_is_bad_request() {
    let app = create_test_router();
    let mut payload = schedule_body(Utc::now());
    payload.as_object_mut().unwrap().remove("sender");

    let (status, body) = send(&app, post_json("/api/emails/schedule", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_schedule_invalid_recipient_is_bad_request() {
    let app = create_test_router();
    let mut payload = schedule_body(Utc::now());
    payload["recipients"] = json!(["not an address"]);

    let (status, body) = send(&app, post_json("/api/emails/schedule", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_schedule_empty_recipients_is_bad_request() {
    let app = create_test_router();
    let mut payload = schedule_body(Utc::now());
    payload["recipients"] = json!([]);

    let (status, _) = send(&app, post_json("/api/emails/schedule", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_schedule_with_queue_down_is_server_error() {
    let app = create_router_with_unreachable_queue();

    let (status, body) = send(
        &app,
        post_json("/api/emails/schedule", &schedule_body(Utc::now())),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], json!("QUEUE_ERROR"));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = create_test_router();
    let (status, body) = send(&app, get("/api/emails/01jabcdefghjkmnpqrstvwxyz0")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("EMAIL_JOB_NOT_FOUND"));
}
