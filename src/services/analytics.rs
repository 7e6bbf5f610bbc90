use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::analytics::{hourly_skeleton, DailyAnalytics, RealtimeStats};
use crate::models::sent_email::MessageStatus;
use crate::services::delivery_queue::DeliveryQueue;
use crate::services::message_store::MessageStore;

/// Per-(campaign, day) rollups plus the realtime view. Every write is a
/// single-statement partial update against the upserted rollup row; rates are
/// recomputed after each write.
#[derive(Clone)]
pub struct AnalyticsAggregator {
    pool: Arc<PgPool>,
    messages: MessageStore,
    queue: DeliveryQueue,
}

impl AnalyticsAggregator {
    pub fn new(pool: Arc<PgPool>, messages: MessageStore, queue: DeliveryQueue) -> Self {
        Self { pool, messages, queue }
    }

    pub async fn record_email_sent(
        &self,
        campaign_id: Uuid,
        day: i32,
        hour: i32,
        sender_email: &str,
        recipient_domain: &str,
    ) -> Result<(), ServiceError> {
        self.record_breakdown(campaign_id, day, hour, sender_email, recipient_domain, "sent")
            .await
    }

    pub async fn record_email_delivered(
        &self,
        campaign_id: Uuid,
        day: i32,
        hour: i32,
        sender_email: &str,
        recipient_domain: &str,
    ) -> Result<(), ServiceError> {
        self.record_breakdown(campaign_id, day, hour, sender_email, recipient_domain, "delivered")
            .await
    }

    pub async fn record_email_failed(
        &self,
        campaign_id: Uuid,
        day: i32,
        hour: i32,
        sender_email: &str,
        recipient_domain: &str,
    ) -> Result<(), ServiceError> {
        self.record_breakdown(campaign_id, day, hour, sender_email, recipient_domain, "failed")
            .await
    }

    pub async fn record_bounce(&self, campaign_id: Uuid, day: i32) -> Result<(), ServiceError> {
        self.ensure_row(campaign_id, day).await?;
        sqlx::query(
            "UPDATE daily_analytics SET total_bounced = total_bounced + 1, updated_at = NOW() WHERE campaign_id = $1 AND day = $2",
        )
        .bind(campaign_id)
        .bind(day)
        .execute(self.pool.as_ref())
        .await?;
        self.recompute_rates(campaign_id, day).await
    }

    /// Every open bumps the total; only a first-time open bumps the unique
    /// counter.
    pub async fn record_open(
        &self,
        campaign_id: Uuid,
        day: i32,
        first_open: bool,
    ) -> Result<(), ServiceError> {
        self.ensure_row(campaign_id, day).await?;
        sqlx::query(
            r#"
            UPDATE daily_analytics
            SET total_opened = total_opened + 1,
                unique_opens = unique_opens + CASE WHEN $3 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE campaign_id = $1 AND day = $2
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .bind(first_open)
        .execute(self.pool.as_ref())
        .await?;
        self.recompute_rates(campaign_id, day).await
    }

    pub async fn record_click(
        &self,
        campaign_id: Uuid,
        day: i32,
        first_click: bool,
    ) -> Result<(), ServiceError> {
        self.ensure_row(campaign_id, day).await?;
        sqlx::query(
            r#"
            UPDATE daily_analytics
            SET total_clicked = total_clicked + 1,
                unique_clicks = unique_clicks + CASE WHEN $3 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE campaign_id = $1 AND day = $2
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .bind(first_click)
        .execute(self.pool.as_ref())
        .await?;
        self.recompute_rates(campaign_id, day).await
    }

    pub async fn for_campaign_day(
        &self,
        campaign_id: Uuid,
        day: i32,
    ) -> Result<Option<DailyAnalytics>, ServiceError> {
        Ok(sqlx::query_as::<_, DailyAnalytics>(
            "SELECT * FROM daily_analytics WHERE campaign_id = $1 AND day = $2",
        )
        .bind(campaign_id)
        .bind(day)
        .fetch_optional(self.pool.as_ref())
        .await?)
    }

    pub async fn list_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<DailyAnalytics>, ServiceError> {
        Ok(sqlx::query_as::<_, DailyAnalytics>(
            "SELECT * FROM daily_analytics WHERE campaign_id = $1 ORDER BY day ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    /// Live aggregation over today's sent_emails plus queue depth, with
    /// legacy status names normalized into the current set.
    pub async fn realtime_stats(
        &self,
        campaign_id: Uuid,
        current_day: i32,
    ) -> Result<RealtimeStats, ServiceError> {
        let rows = self.messages.realtime_counts(campaign_id, current_day).await?;
        let mut stats = RealtimeStats {
            campaign_id: Some(campaign_id),
            day: current_day,
            ..Default::default()
        };

        for (status, count, opens, clicks) in rows {
            stats.total_opens += opens;
            stats.total_clicks += clicks;
            match MessageStatus::normalize(&status) {
                "queued" => stats.queued += count,
                "sent" => stats.sent += count,
                "delivered" => stats.delivered += count,
                "failed" => stats.failed += count,
                "bounced" => stats.bounced += count,
                "opened" => stats.opened += count,
                "clicked" => stats.clicked += count,
                "unsubscribed" => stats.unsubscribed += count,
                other => tracing::debug!(status = other, "unrecognized message status"),
            }
        }

        let queue = self.queue.counts_by_campaign(campaign_id).await?;
        stats.jobs_waiting = queue.waiting;
        stats.jobs_delayed = queue.delayed;
        stats.jobs_active = queue.active;
        Ok(stats)
    }

    async fn ensure_row(&self, campaign_id: Uuid, day: i32) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO daily_analytics (id, campaign_id, day, hourly, domains, senders, created_at, updated_at)
            VALUES ($1, $2, $3, $4, '{}'::jsonb, '{}'::jsonb, NOW(), NOW())
            ON CONFLICT (campaign_id, day) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(day)
        .bind(hourly_skeleton())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Bumps the summary column, the hour slot, and the per-domain and
    /// per-sender entries (inserted on first sight) for one metric.
    async fn record_breakdown(
        &self,
        campaign_id: Uuid,
        day: i32,
        hour: i32,
        sender_email: &str,
        recipient_domain: &str,
        metric: &'static str,
    ) -> Result<(), ServiceError> {
        self.ensure_row(campaign_id, day).await?;

        // `metric` comes from the fixed call sites above, never from input.
        let sql = format!(
            r#"
            UPDATE daily_analytics
            SET total_{metric} = total_{metric} + 1,
                hourly = jsonb_set(hourly, ARRAY[$3::text, '{metric}'],
                    (COALESCE(hourly #>> ARRAY[$3::text, '{metric}'], '0')::int + 1)::text::jsonb),
                domains = jsonb_set(
                    CASE WHEN domains ? $4 THEN domains
                         ELSE jsonb_set(domains, ARRAY[$4], '{{}}'::jsonb) END,
                    ARRAY[$4, '{metric}'],
                    (COALESCE(domains #>> ARRAY[$4, '{metric}'], '0')::int + 1)::text::jsonb,
                    true),
                senders = jsonb_set(
                    CASE WHEN senders ? $5 THEN senders
                         ELSE jsonb_set(senders, ARRAY[$5], '{{}}'::jsonb) END,
                    ARRAY[$5, '{metric}'],
                    (COALESCE(senders #>> ARRAY[$5, '{metric}'], '0')::int + 1)::text::jsonb,
                    true),
                updated_at = NOW()
            WHERE campaign_id = $1 AND day = $2
            "#,
            metric = metric,
        );

        sqlx::query(&sql)
            .bind(campaign_id)
            .bind(day)
            .bind(hour)
            .bind(recipient_domain)
            .bind(sender_email)
            .execute(self.pool.as_ref())
            .await?;

        self.recompute_rates(campaign_id, day).await
    }

    /// Undefined ratios stay at 0.
    async fn recompute_rates(&self, campaign_id: Uuid, day: i32) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE daily_analytics
            SET delivery_rate = ROUND(CASE WHEN total_sent > 0 THEN total_delivered::numeric / total_sent ELSE 0 END, 2)::float8,
                bounce_rate = ROUND(CASE WHEN total_sent > 0 THEN total_bounced::numeric / total_sent ELSE 0 END, 2)::float8,
                open_rate = ROUND(CASE WHEN total_delivered > 0 THEN total_opened::numeric / total_delivered ELSE 0 END, 2)::float8,
                click_rate = ROUND(CASE WHEN total_delivered > 0 THEN total_clicked::numeric / total_delivered ELSE 0 END, 2)::float8,
                click_to_open_rate = ROUND(CASE WHEN unique_opens > 0 THEN total_clicked::numeric / unique_opens ELSE 0 END, 2)::float8
            WHERE campaign_id = $1 AND day = $2
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}
