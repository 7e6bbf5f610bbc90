use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::ServiceError;
use crate::services::analytics::AnalyticsAggregator;
use crate::services::campaign_store::CampaignStore;
use crate::services::delivery_queue::Job;
use crate::services::event_bus::EventBus;
use crate::services::mail_transport::{MailTransport, OutboundEmail};
use crate::services::message_store::MessageStore;
use crate::services::rate_limiter::RateLimiter;

/// A job past its UTC calendar day, or older than this, is dropped unsent.
const STALE_AFTER_HOURS: i64 = 2;

#[derive(Debug, PartialEq)]
pub enum JobOutcome {
    Sent,
    Skipped(&'static str),
}

/// Executes one delayed send job. Combined with the unique
/// (campaign, recipient, day) index and the staleness guard, a job dispatched
/// twice still issues at most one provider call.
#[derive(Clone)]
pub struct EmailJobProcessor {
    campaigns: CampaignStore,
    messages: MessageStore,
    analytics: AnalyticsAggregator,
    transport: Arc<dyn MailTransport>,
    limiter: Arc<RateLimiter>,
    bus: EventBus,
}

impl EmailJobProcessor {
    pub fn new(
        campaigns: CampaignStore,
        messages: MessageStore,
        analytics: AnalyticsAggregator,
        transport: Arc<dyn MailTransport>,
        limiter: Arc<RateLimiter>,
        bus: EventBus,
    ) -> Self {
        Self { campaigns, messages, analytics, transport, limiter, bus }
    }

    pub async fn process(&self, job: &Job) -> Result<JobOutcome, ServiceError> {
        let payload = job.email_payload()?;
        let started = std::time::Instant::now();

        // A record in a non-retryable state means another dispatch already
        // handled this (campaign, recipient, day).
        if let Some(existing) = self
            .messages
            .find_for_send(payload.campaign_id, &payload.recipient_email, payload.day)
            .await?
        {
            if existing.status != "queued" && existing.status != "failed" {
                return Ok(JobOutcome::Skipped("duplicate_send"));
            }
        }

        let campaign = match self.campaigns.find(payload.campaign_id).await {
            Ok(c) => c,
            Err(ServiceError::NotFound(_)) => return Ok(JobOutcome::Skipped("campaign_missing")),
            Err(e) => return Err(e),
        };
        if !campaign.is_running() {
            return Ok(JobOutcome::Skipped("campaign_not_running"));
        }

        if is_stale(payload.scheduled_for, Utc::now()) {
            return Ok(JobOutcome::Skipped("stale_job"));
        }

        let sent_id = self
            .messages
            .upsert_queued(
                payload.campaign_id,
                &payload.recipient_email,
                &payload.recipient_domain,
                &payload.sender_email,
                &payload.sender_domain,
                &payload.template_name,
                payload.day,
                payload.hour,
                payload.minute,
                payload.second,
                job.retry_count,
            )
            .await?;

        self.limiter.acquire().await;

        let email = OutboundEmail {
            from: payload.sender_email.clone(),
            to: payload.recipient_email.clone(),
            template_name: payload.template_name.clone(),
            variables: payload.template_data.clone(),
            campaign_tag: payload.campaign_id.to_string(),
        };

        match self.transport.send(&email).await {
            Ok(message_id) => {
                let elapsed_ms = started.elapsed().as_millis() as i32;
                self.messages.mark_sent(sent_id, &message_id, elapsed_ms).await?;
                self.campaigns.inc_sent(payload.campaign_id).await?;
                self.analytics
                    .record_email_sent(
                        payload.campaign_id,
                        payload.day,
                        payload.hour,
                        &payload.sender_email,
                        &payload.recipient_domain,
                    )
                    .await?;
                self.bus.publish(
                    "email_sent",
                    payload.campaign_id,
                    serde_json::json!({
                        "recipient": payload.recipient_email,
                        "sender": payload.sender_email,
                        "messageId": message_id,
                        "day": payload.day,
                    }),
                );
                Ok(JobOutcome::Sent)
            }
            Err(e) => {
                let error = e.to_string();
                self.messages.mark_send_failed(sent_id, &error).await?;
                self.campaigns.inc_failed(payload.campaign_id).await?;
                self.analytics
                    .record_email_failed(
                        payload.campaign_id,
                        payload.day,
                        payload.hour,
                        &payload.sender_email,
                        &payload.recipient_domain,
                    )
                    .await?;
                self.bus.publish(
                    "email_failed",
                    payload.campaign_id,
                    serde_json::json!({
                        "recipient": payload.recipient_email,
                        "error": error,
                        "attempt": job.retry_count,
                    }),
                );
                // Propagate so the queue applies the backoff policy.
                Err(e)
            }
        }
    }
}

/// Stale when the scheduled time rolled over the UTC day or is more than two
/// hours in the past.
pub fn is_stale(scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    scheduled_for.date_naive() != now.date_naive()
        || now.signed_duration_since(scheduled_for) > Duration::hours(STALE_AFTER_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_same_day_recent_job_is_fresh() {
        let scheduled = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 11, 30, 0).unwrap();
        assert!(!is_stale(scheduled, now));
    }

    #[test]
    fn test_job_older_than_two_hours_is_stale() {
        let scheduled = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 1).unwrap();
        assert!(is_stale(scheduled, now));
    }

    #[test]
    fn test_job_from_previous_utc_day_is_stale() {
        let scheduled = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 10, 0).unwrap();
        assert!(is_stale(scheduled, now));
    }

    #[test]
    fn test_future_job_on_same_day_is_fresh() {
        let scheduled = Utc.with_ymd_and_hms(2024, 1, 2, 18, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        assert!(!is_stale(scheduled, now));
    }
}
