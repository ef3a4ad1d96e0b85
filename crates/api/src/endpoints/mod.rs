//! API endpoints.

mod emails;
mod meta;

use axum::{Router, routing::get};

use crate::state::AppState;

/// Create the API router, mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new().nest("/emails", emails::router())
}

/// Create the full application router.
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(meta::ping))
        .nest("/api", router())
}
