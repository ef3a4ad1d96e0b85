//! Shared application state.

use mailsched_core::EmailJobService;
use mailsched_queue::Dispatcher;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Email job persistence and validation.
    pub email_job_service: EmailJobService,
    /// Hands created jobs to the active scheduler.
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub fn new(email_job_service: EmailJobService, dispatcher: Dispatcher) -> Self {
        Self {
            email_job_service,
            dispatcher,
        }
    }
}
