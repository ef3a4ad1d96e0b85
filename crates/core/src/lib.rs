//! Core business logic for mailsched.
//!
//! Holds the seams the dispatch queue consumes: the [`JobStore`] record
//! store and the [`MailSender`] transport, plus the [`EmailJobService`]
//! used by the HTTP layer.

pub mod services;

pub use services::*;
