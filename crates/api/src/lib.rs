//! HTTP API layer for mailsched.
//!
//! - **Endpoints**: schedule and inspect email jobs under `/api/emails`
//! - **State**: shared services handed to every handler
//!
//! Built on Axum 0.8.

pub mod endpoints;
pub mod response;
pub mod state;

pub use endpoints::{app_router, router};
pub use state::AppState;
