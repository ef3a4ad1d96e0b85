//! Database entities.

pub mod email_job;

pub use email_job::Entity as EmailJob;
