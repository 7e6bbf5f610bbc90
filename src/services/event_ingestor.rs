use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::event::{ProviderEvent, RawProviderEvent};
use crate::services::analytics::AnalyticsAggregator;
use crate::services::campaign_store::CampaignStore;
use crate::services::event_bus::EventBus;
use crate::services::message_store::MessageStore;

#[derive(Debug, PartialEq)]
pub enum WebhookOutcome {
    SubscriptionConfirmed,
    Processed,
    Ignored(&'static str),
}

/// SNS envelope around provider notifications. `Message` is itself a JSON
/// string.
#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "SubscribeURL")]
    subscribe_url: Option<String>,
}

/// Turns raw webhook posts into SentEmail status transitions, campaign
/// counters and daily analytics. Malformed events are logged and dropped,
/// never surfaced.
#[derive(Clone)]
pub struct EventIngestor {
    pool: Arc<PgPool>,
    campaigns: CampaignStore,
    messages: MessageStore,
    analytics: AnalyticsAggregator,
    bus: EventBus,
    http: reqwest::Client,
}

impl EventIngestor {
    pub fn new(
        pool: Arc<PgPool>,
        campaigns: CampaignStore,
        messages: MessageStore,
        analytics: AnalyticsAggregator,
        bus: EventBus,
    ) -> Self {
        Self { pool, campaigns, messages, analytics, bus, http: reqwest::Client::new() }
    }

    /// Entry point for `POST /webhooks/ses`. The `x-amz-sns-message-type`
    /// header selects the branch; anything else is treated as a raw provider
    /// event body.
    pub async fn handle_webhook(
        &self,
        sns_message_type: Option<&str>,
        body: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        match sns_message_type {
            Some("SubscriptionConfirmation") => {
                let envelope: SnsEnvelope = serde_json::from_str(body)
                    .map_err(|e| ServiceError::Validation(format!("bad SNS envelope: {}", e)))?;
                let url = envelope
                    .subscribe_url
                    .ok_or_else(|| ServiceError::Validation("missing SubscribeURL".into()))?;
                self.http
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(|e| ServiceError::TransientIo(e.to_string()))?;
                tracing::info!("confirmed webhook subscription");
                Ok(WebhookOutcome::SubscriptionConfirmed)
            }
            Some("Notification") => {
                let raw = match parse_notification(body) {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(%e, "dropping malformed notification");
                        return Ok(WebhookOutcome::Ignored("malformed_notification"));
                    }
                };
                self.process_event(raw).await
            }
            _ => {
                let raw: RawProviderEvent = match serde_json::from_str(body) {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(%e, "dropping malformed provider event");
                        return Ok(WebhookOutcome::Ignored("malformed_event"));
                    }
                };
                self.process_event(raw).await
            }
        }
    }

    async fn process_event(&self, raw: RawProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        let campaign_id = match raw.mail.campaign_id() {
            Some(id) => id,
            None => {
                tracing::debug!(message_id = %raw.mail.message_id, "event without campaign tag");
                return Ok(WebhookOutcome::Ignored("missing_campaign_tag"));
            }
        };
        let event = match ProviderEvent::from_raw(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%e, "dropping event of unknown type");
                return Ok(WebhookOutcome::Ignored("unknown_event_type"));
            }
        };

        self.append_audit_event(campaign_id, &raw, &event).await?;

        // Pre-mutation snapshot decides first-time semantics below.
        let sent = match self.messages.find_by_message_id(&raw.mail.message_id).await? {
            Some(sent) => sent,
            None => {
                tracing::warn!(
                    message_id = %raw.mail.message_id,
                    campaign_id = %campaign_id,
                    "event for unknown message id"
                );
                return Ok(WebhookOutcome::Ignored("unknown_message_id"));
            }
        };

        let at = event.timestamp().unwrap_or_else(Utc::now);
        self.messages.advance_status(sent.id, event.mapped_status(), at).await?;

        match &event {
            ProviderEvent::Delivery(_) => {
                // Guarded on the pre-mutation timestamp so a replayed
                // webhook cannot double-count.
                if sent.delivered_at.is_none() {
                    self.campaigns.inc_delivered(campaign_id).await?;
                    self.analytics
                        .record_email_delivered(
                            campaign_id,
                            sent.day,
                            sent.hour,
                            &sent.sender_email,
                            &sent.recipient_domain,
                        )
                        .await?;
                }
            }
            ProviderEvent::Bounce(_) => {
                if sent.bounced_at.is_none() {
                    self.campaigns.inc_bounced(campaign_id).await?;
                    self.analytics.record_bounce(campaign_id, sent.day).await?;
                }
            }
            ProviderEvent::Open(detail) => {
                let first_open = sent.open_count == 0;
                self.messages
                    .record_open(sent.id, detail.user_agent.as_deref(), detail.ip_address.as_deref())
                    .await?;
                if first_open {
                    self.campaigns.inc_opened(campaign_id).await?;
                }
                self.analytics.record_open(campaign_id, sent.day, first_open).await?;
            }
            ProviderEvent::Click(detail) => {
                let first_click = sent.click_count == 0;
                self.messages
                    .record_click(sent.id, detail.user_agent.as_deref(), detail.ip_address.as_deref())
                    .await?;
                if first_click {
                    self.campaigns.inc_clicked(campaign_id).await?;
                }
                self.analytics.record_click(campaign_id, sent.day, first_click).await?;
            }
            ProviderEvent::Send
            | ProviderEvent::Complaint(_)
            | ProviderEvent::Reject(_)
            | ProviderEvent::RenderingFailure(_) => {}
        }

        self.bus.publish(
            "email_event",
            campaign_id,
            serde_json::json!({
                "eventType": event.event_type(),
                "messageId": raw.mail.message_id,
                "recipient": sent.recipient_email,
            }),
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn append_audit_event(
        &self,
        campaign_id: Uuid,
        raw: &RawProviderEvent,
        event: &ProviderEvent,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO campaign_events (id, campaign_id, message_id, event_type, event_timestamp,
                                         recipient, details, user_agent, ip_address, link, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(&raw.mail.message_id)
        .bind(event.event_type())
        .bind(event.timestamp().unwrap_or_else(Utc::now))
        .bind(raw.mail.destination.first().map(|s| s.as_str()))
        .bind(event.details_json())
        .bind(event.user_agent())
        .bind(event.ip_address())
        .bind(event.link())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}

/// Unwraps the JSON-in-a-string `Message` of an SNS notification.
fn parse_notification(body: &str) -> Result<RawProviderEvent, ServiceError> {
    let envelope: SnsEnvelope = serde_json::from_str(body)?;
    let message = envelope
        .message
        .ok_or_else(|| ServiceError::ProviderEventMalformed("notification without Message".into()))?;
    Ok(serde_json::from_str(&message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification_unwraps_message_string() {
        let inner = serde_json::json!({
            "eventType": "Delivery",
            "mail": {
                "messageId": "m-1",
                "tags": { "X-Campaign-ID": ["6a3f9c1e-58d9-4f5a-9a40-2b8f6f2d9e01"] }
            },
            "delivery": {}
        });
        let body = serde_json::json!({
            "Type": "Notification",
            "Message": inner.to_string()
        })
        .to_string();

        let raw = parse_notification(&body).unwrap();
        assert_eq!(raw.event_type, "Delivery");
        assert_eq!(raw.mail.message_id, "m-1");
        assert!(raw.mail.campaign_id().is_some());
    }

    #[test]
    fn test_parse_notification_without_message_fails() {
        let body = serde_json::json!({ "Type": "Notification" }).to_string();
        assert!(parse_notification(&body).is_err());
    }

    #[test]
    fn test_sns_envelope_subscribe_url() {
        let body = serde_json::json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": "https://sns.example.com/confirm?token=abc"
        })
        .to_string();
        let envelope: SnsEnvelope = serde_json::from_str(&body).unwrap();
        assert_eq!(
            envelope.subscribe_url.as_deref(),
            Some("https://sns.example.com/confirm?token=abc")
        );
    }
}
