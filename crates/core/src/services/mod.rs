//! Business logic services.

pub mod email_job;
pub mod job_store;
pub mod mail_sender;

pub use email_job::{EmailJobService, ScheduleEmailInput};
pub use job_store::{JobStore, JobUpdate, MemoryJobStore, NewEmailJob};
pub use mail_sender::{LogMailSender, MailError, MailSender, OutgoingMail, SmtpMailSender};
