//! Outgoing mail transport.

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailsched_common::config::SmtpConfig;
use thiserror::Error;

/// A message ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    /// Sender address.
    pub from: String,
    /// Recipient addresses, in order.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub body: String,
}

/// Mail transport error.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Sends a single message. A returned error is final for that message.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

/// SMTP transport backed by lettre.
pub struct SmtpMailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailSender {
    /// Build a transport for the configured relay.
    ///
    /// No connection is made until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(host = %config.host, port = config.port, starttls = config.starttls, "SMTP transport configured");

        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, MailError> {
    addr.parse::<Mailbox>()
        .map_err(|e| MailError::InvalidAddress(format!("{addr}: {e}")))
}

fn build_message(mail: OutgoingMail) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&mail.from)?)
        .subject(mail.subject)
        .header(ContentType::TEXT_HTML);

    for to in &mail.to {
        builder = builder.to(parse_mailbox(to)?);
    }

    builder
        .body(mail.body)
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let message = build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Accepts every message and only logs it.
///
/// Used when no SMTP relay is configured.
#[derive(Debug, Default, Clone)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        tracing::info!(
            from = %mail.from,
            to = ?mail.to,
            subject = %mail.subject,
            body_len = mail.body.len(),
            "Mail accepted by log transport"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mail(from: &str, to: &[&str]) -> OutgoingMail {
        OutgoingMail {
            from: from.to_string(),
            to: to.iter().map(ToString::to_string).collect(),
            subject: "Hello".to_string(),
            body: "<b>hi</b>".to_string(),
        }
    }

    #[test]
    fn test_build_message_multiple_recipients() {
        let message = build_message(mail(
            "sender@example.com",
            &["a@example.com", "b@example.com"],
        ))
        .unwrap();
        assert_eq!(message.envelope().to().len(), 2);
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let err = build_message(mail("sender@example.com", &["not-an-address"])).unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress(a) if a.starts_with("not-an-address")));
    }

    #[tokio::test]
    async fn test_log_sender_accepts() {
        let sender = LogMailSender;
        assert!(sender.send(mail("x@example.com", &["y@example.com"])).await.is_ok());
    }
}
