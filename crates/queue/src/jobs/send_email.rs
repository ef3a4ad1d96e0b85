//! Send email job.

use serde::{Deserialize, Serialize};

/// Job to attempt delivery of a stored email job.
///
/// Only the id travels through the queue; the worker reads the current
/// record from the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEmailJob {
    /// The email job ID.
    pub email_job_id: String,
}

impl SendEmailJob {
    /// Create a new send email job.
    #[must_use]
    pub fn new(email_job_id: &str) -> Self {
        Self {
            email_job_id: email_job_id.to_string(),
        }
    }
}
