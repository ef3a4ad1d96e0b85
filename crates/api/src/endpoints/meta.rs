//! Liveness endpoint.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

/// Report that the server is up and which dispatch backend is active.
pub async fn ping(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "dispatch": state.dispatcher.backend_kind(),
    }))
}
