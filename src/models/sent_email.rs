use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One intended send per (campaign, recipient, day). Created at enqueue time
/// in `queued` state, mutated by the delivery worker and the event ingestor,
/// deleted only by the warm-up cycle reset.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SentEmail {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_email: String,
    pub recipient_domain: String,
    pub sender_email: String,
    pub sender_domain: String,
    pub template_name: String,
    pub message_id: Option<String>,
    pub status: String,

    pub queued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,

    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub attempt_number: i32,
    pub processing_time_ms: Option<i32>,

    pub open_count: i32,
    pub click_count: i32,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,

    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Opened,
    Clicked,
    Unsubscribed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Bounced => "bounced",
            MessageStatus::Opened => "opened",
            MessageStatus::Clicked => "clicked",
            MessageStatus::Unsubscribed => "unsubscribed",
        }
    }

    /// Normalizes legacy provider status names that leaked into old rows.
    pub fn normalize(raw: &str) -> &str {
        match raw {
            "send" => "sent",
            "delivery" => "delivered",
            "open" => "opened",
            "click" => "clicked",
            "bounce" => "bounced",
            other => other,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_legacy_statuses() {
        assert_eq!(MessageStatus::normalize("send"), "sent");
        assert_eq!(MessageStatus::normalize("delivery"), "delivered");
        assert_eq!(MessageStatus::normalize("open"), "opened");
        assert_eq!(MessageStatus::normalize("click"), "clicked");
        assert_eq!(MessageStatus::normalize("bounce"), "bounced");
        assert_eq!(MessageStatus::normalize("delivered"), "delivered");
    }
}
