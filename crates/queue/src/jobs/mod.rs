//! Job definitions.

mod send_email;

pub use send_email::SendEmailJob;
