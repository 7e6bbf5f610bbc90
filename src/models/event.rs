use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::sent_email::MessageStatus;

/// Append-only audit row, one per provider event received on the webhook.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CampaignEvent {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub message_id: String,
    pub event_type: String,
    pub event_timestamp: DateTime<Utc>,
    pub recipient: Option<String>,
    pub details: serde_json::Value,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw provider event shape as posted by the mail provider (directly, or
/// wrapped in an SNS Notification `Message` string).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProviderEvent {
    pub event_type: String,
    pub mail: MailObject,
    #[serde(default)]
    pub delivery: Option<DeliveryDetail>,
    #[serde(default)]
    pub open: Option<OpenDetail>,
    #[serde(default)]
    pub click: Option<ClickDetail>,
    #[serde(default)]
    pub bounce: Option<BounceDetail>,
    #[serde(default)]
    pub complaint: Option<ComplaintDetail>,
    #[serde(default)]
    pub reject: Option<RejectDetail>,
    #[serde(default)]
    pub failure: Option<RenderingFailureDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailObject {
    pub message_id: String,
    #[serde(default)]
    pub destination: Vec<String>,
    #[serde(default)]
    pub tags: std::collections::HashMap<String, Vec<String>>,
}

impl MailObject {
    pub fn campaign_id(&self) -> Option<Uuid> {
        self.tags
            .get("X-Campaign-ID")
            .and_then(|v| v.first())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDetail {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub smtp_response: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDetail {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickDetail {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BounceDetail {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bounce_type: Option<String>,
    #[serde(default)]
    pub bounce_sub_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintDetail {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complaint_feedback_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectDetail {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderingFailureDetail {
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
}

/// Provider event decoded into one variant per event type, each carrying its
/// own detail record.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Send,
    Delivery(DeliveryDetail),
    Open(OpenDetail),
    Click(ClickDetail),
    Bounce(BounceDetail),
    Complaint(ComplaintDetail),
    Reject(RejectDetail),
    RenderingFailure(RenderingFailureDetail),
}

impl ProviderEvent {
    pub fn from_raw(raw: &RawProviderEvent) -> Result<Self, ServiceError> {
        let event = match raw.event_type.as_str() {
            "Send" => ProviderEvent::Send,
            "Delivery" => ProviderEvent::Delivery(raw.delivery.clone().unwrap_or_default()),
            "Open" => ProviderEvent::Open(raw.open.clone().unwrap_or_default()),
            "Click" => ProviderEvent::Click(raw.click.clone().unwrap_or_default()),
            "Bounce" => ProviderEvent::Bounce(raw.bounce.clone().unwrap_or_default()),
            "Complaint" => ProviderEvent::Complaint(raw.complaint.clone().unwrap_or_default()),
            "Reject" => ProviderEvent::Reject(raw.reject.clone().unwrap_or_default()),
            "Rendering Failure" => {
                ProviderEvent::RenderingFailure(raw.failure.clone().unwrap_or_default())
            }
            other => {
                return Err(ServiceError::ProviderEventMalformed(format!(
                    "unknown event type: {}",
                    other
                )))
            }
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ProviderEvent::Send => "Send",
            ProviderEvent::Delivery(_) => "Delivery",
            ProviderEvent::Open(_) => "Open",
            ProviderEvent::Click(_) => "Click",
            ProviderEvent::Bounce(_) => "Bounce",
            ProviderEvent::Complaint(_) => "Complaint",
            ProviderEvent::Reject(_) => "Reject",
            ProviderEvent::RenderingFailure(_) => "Rendering Failure",
        }
    }

    /// Message status this event transitions the SentEmail to.
    pub fn mapped_status(&self) -> MessageStatus {
        match self {
            ProviderEvent::Send => MessageStatus::Sent,
            ProviderEvent::Delivery(_) => MessageStatus::Delivered,
            ProviderEvent::Open(_) => MessageStatus::Opened,
            ProviderEvent::Click(_) => MessageStatus::Clicked,
            ProviderEvent::Bounce(_) => MessageStatus::Bounced,
            ProviderEvent::Complaint(_)
            | ProviderEvent::Reject(_)
            | ProviderEvent::RenderingFailure(_) => MessageStatus::Failed,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            ProviderEvent::Send => None,
            ProviderEvent::Delivery(d) => d.timestamp,
            ProviderEvent::Open(d) => d.timestamp,
            ProviderEvent::Click(d) => d.timestamp,
            ProviderEvent::Bounce(d) => d.timestamp,
            ProviderEvent::Complaint(d) => d.timestamp,
            ProviderEvent::Reject(_) | ProviderEvent::RenderingFailure(_) => None,
        }
    }

    pub fn user_agent(&self) -> Option<&str> {
        match self {
            ProviderEvent::Open(d) => d.user_agent.as_deref(),
            ProviderEvent::Click(d) => d.user_agent.as_deref(),
            _ => None,
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        match self {
            ProviderEvent::Open(d) => d.ip_address.as_deref(),
            ProviderEvent::Click(d) => d.ip_address.as_deref(),
            _ => None,
        }
    }

    pub fn link(&self) -> Option<&str> {
        match self {
            ProviderEvent::Click(d) => d.link.as_deref(),
            _ => None,
        }
    }

    pub fn details_json(&self) -> serde_json::Value {
        match self {
            ProviderEvent::Send => serde_json::json!({}),
            ProviderEvent::Delivery(d) => serde_json::to_value(d).unwrap_or_default(),
            ProviderEvent::Open(d) => serde_json::to_value(d).unwrap_or_default(),
            ProviderEvent::Click(d) => serde_json::to_value(d).unwrap_or_default(),
            ProviderEvent::Bounce(d) => serde_json::to_value(d).unwrap_or_default(),
            ProviderEvent::Complaint(d) => serde_json::to_value(d).unwrap_or_default(),
            ProviderEvent::Reject(d) => serde_json::to_value(d).unwrap_or_default(),
            ProviderEvent::RenderingFailure(d) => serde_json::to_value(d).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_decodes_tagged_variant() {
        let body = serde_json::json!({
            "eventType": "Open",
            "mail": {
                "messageId": "msg-123",
                "destination": ["user@example.com"],
                "tags": { "X-Campaign-ID": ["8a9b6f60-9c9e-4f77-9c55-0a2cf0a5a111"] }
            },
            "open": {
                "userAgent": "Mozilla/5.0",
                "ipAddress": "10.0.0.1"
            }
        });
        let raw: RawProviderEvent = serde_json::from_value(body).unwrap();
        assert!(raw.mail.campaign_id().is_some());

        let event = ProviderEvent::from_raw(&raw).unwrap();
        assert_eq!(event.event_type(), "Open");
        assert_eq!(event.mapped_status(), MessageStatus::Opened);
        assert_eq!(event.user_agent(), Some("Mozilla/5.0"));
        assert_eq!(event.ip_address(), Some("10.0.0.1"));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            ("Send", MessageStatus::Sent),
            ("Delivery", MessageStatus::Delivered),
            ("Open", MessageStatus::Opened),
            ("Click", MessageStatus::Clicked),
            ("Bounce", MessageStatus::Bounced),
            ("Complaint", MessageStatus::Failed),
            ("Reject", MessageStatus::Failed),
            ("Rendering Failure", MessageStatus::Failed),
        ];
        for (event_type, expected) in cases {
            let raw: RawProviderEvent = serde_json::from_value(serde_json::json!({
                "eventType": event_type,
                "mail": { "messageId": "m" }
            }))
            .unwrap();
            assert_eq!(ProviderEvent::from_raw(&raw).unwrap().mapped_status(), expected);
        }
    }

    #[test]
    fn test_unknown_event_type_is_malformed() {
        let raw: RawProviderEvent = serde_json::from_value(serde_json::json!({
            "eventType": "Subscription",
            "mail": { "messageId": "m" }
        }))
        .unwrap();
        assert!(ProviderEvent::from_raw(&raw).is_err());
    }

    #[test]
    fn test_missing_campaign_tag() {
        let raw: RawProviderEvent = serde_json::from_value(serde_json::json!({
            "eventType": "Delivery",
            "mail": { "messageId": "m", "tags": {} }
        }))
        .unwrap();
        assert!(raw.mail.campaign_id().is_none());
    }
}
