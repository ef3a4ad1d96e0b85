//! Repositories for database access.

mod email_job;

pub use email_job::EmailJobRepository;
