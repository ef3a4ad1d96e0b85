//! Email job entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an email job.
///
/// `Pending` is the initial state; `Sent` and `Failed` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "UPPERCASE")]
pub enum EmailJobStatus {
    /// Waiting for its due time (or for a rate-limit slot).
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Handed to the mail transport successfully.
    #[sea_orm(string_value = "sent")]
    Sent,
    /// The mail transport rejected the message.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl EmailJobStatus {
    /// Whether no further transition is allowed from this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl std::fmt::Display for EmailJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// An email scheduled for future delivery.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Subject line.
    pub subject: String,

    /// HTML body.
    #[sea_orm(column_type = "Text")]
    pub body: String,

    /// Envelope sender; also the rate-limit key.
    #[sea_orm(indexed)]
    pub sender: String,

    /// Ordered recipient addresses (JSON array of strings).
    #[sea_orm(column_type = "JsonBinary")]
    pub recipients: Json,

    /// Requested delivery time.
    #[sea_orm(indexed)]
    pub scheduled_at: DateTimeWithTimeZone,

    /// Current status.
    pub status: EmailJobStatus,

    /// When the message was handed to the transport.
    #[sea_orm(nullable)]
    pub sent_at: Option<DateTimeWithTimeZone>,

    /// When the send attempt failed.
    #[sea_orm(nullable)]
    pub failed_at: Option<DateTimeWithTimeZone>,

    /// Transport error message for failed jobs.
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,

    /// When this job was created.
    pub created_at: DateTimeWithTimeZone,

    /// When this job was last updated.
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Recipient addresses in submission order.
    ///
    /// Entries that are not strings are skipped.
    #[must_use]
    pub fn recipient_list(&self) -> Vec<String> {
        self.recipients
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_recipient_list_preserves_order() {
        let now = Utc::now();
        let model = Model {
            id: "job1".to_string(),
            subject: "Hi".to_string(),
            body: "<p>Hello</p>".to_string(),
            sender: "from@example.com".to_string(),
            recipients: json!(["b@example.com", "a@example.com", 42]),
            scheduled_at: now.into(),
            status: EmailJobStatus::Pending,
            sent_at: None,
            failed_at: None,
            error: None,
            created_at: now.into(),
            updated_at: None,
        };

        assert_eq!(
            model.recipient_list(),
            vec!["b@example.com".to_string(), "a@example.com".to_string()]
        );
    }

    #[test]
    fn test_status_terminality() {
        assert!(!EmailJobStatus::Pending.is_terminal());
        assert!(EmailJobStatus::Sent.is_terminal());
        assert!(EmailJobStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&EmailJobStatus::Pending).ok(),
            Some("\"PENDING\"".to_string())
        );
    }
}
