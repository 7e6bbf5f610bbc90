use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::sent_email::{MessageStatus, SentEmail};

/// Exclusive owner of sent_emails. The unique `(campaign_id, recipient_email,
/// day)` index is the correctness gate for at-most-one send per recipient per
/// day; all mutations are single-statement partial updates.
#[derive(Clone)]
pub struct MessageStore {
    pool: Arc<PgPool>,
}

/// Status ladder used to keep transitions monotonic when provider events
/// arrive out of order. Equal rank never overwrites.
const STATUS_RANK_SQL: &str = r#"
    CASE s WHEN 'queued' THEN 0 WHEN 'sent' THEN 1
           WHEN 'failed' THEN 2 WHEN 'bounced' THEN 2 WHEN 'delivered' THEN 2
           WHEN 'opened' THEN 3 WHEN 'clicked' THEN 4 WHEN 'unsubscribed' THEN 5
           ELSE 0 END
"#;

fn rank_expr(column: &str) -> String {
    STATUS_RANK_SQL.replace(" s ", &format!(" {} ", column))
}

impl MessageStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn find_for_send(
        &self,
        campaign_id: Uuid,
        recipient_email: &str,
        day: i32,
    ) -> Result<Option<SentEmail>, ServiceError> {
        Ok(sqlx::query_as::<_, SentEmail>(
            "SELECT * FROM sent_emails WHERE campaign_id = $1 AND recipient_email = $2 AND day = $3",
        )
        .bind(campaign_id)
        .bind(recipient_email)
        .bind(day)
        .fetch_optional(self.pool.as_ref())
        .await?)
    }

    pub async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<SentEmail>, ServiceError> {
        Ok(sqlx::query_as::<_, SentEmail>("SELECT * FROM sent_emails WHERE message_id = $1")
            .bind(message_id)
            .fetch_optional(self.pool.as_ref())
            .await?)
    }

    /// Creates or re-queues the per-(campaign, recipient, day) record for a
    /// delivery attempt. A conflicting row in a non-retryable state is left
    /// untouched by the caller's existence check before this runs.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_queued(
        &self,
        campaign_id: Uuid,
        recipient_email: &str,
        recipient_domain: &str,
        sender_email: &str,
        sender_domain: &str,
        template_name: &str,
        day: i32,
        hour: i32,
        minute: i32,
        second: i32,
        attempt_number: i32,
    ) -> Result<Uuid, ServiceError> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO sent_emails (
                id, campaign_id, recipient_email, recipient_domain,
                sender_email, sender_domain, template_name, status,
                queued_at, day, hour, minute, second, attempt_number, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', NOW(), $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (campaign_id, recipient_email, day) DO UPDATE
            SET status = 'queued',
                queued_at = NOW(),
                attempt_number = $12,
                sender_email = $5,
                sender_domain = $6,
                template_name = $7
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(recipient_email)
        .bind(recipient_domain)
        .bind(sender_email)
        .bind(sender_domain)
        .bind(template_name)
        .bind(day)
        .bind(hour)
        .bind(minute)
        .bind(second)
        .bind(attempt_number)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(id.0)
    }

    pub async fn mark_sent(
        &self,
        id: Uuid,
        message_id: &str,
        processing_time_ms: i32,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE sent_emails
            SET status = 'sent', message_id = $2, sent_at = NOW(), processing_time_ms = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message_id)
        .bind(processing_time_ms)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn mark_send_failed(&self, id: Uuid, error: &str) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE sent_emails SET status = 'failed', failed_at = NOW(), error_details = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Applies a provider status transition: the per-status timestamp is
    /// always stamped, the status itself only moves up the ladder.
    pub async fn advance_status(
        &self,
        id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let ts_column = match status {
            MessageStatus::Queued => "queued_at",
            MessageStatus::Sent => "sent_at",
            MessageStatus::Delivered => "delivered_at",
            MessageStatus::Failed => "failed_at",
            MessageStatus::Bounced => "bounced_at",
            MessageStatus::Opened => "opened_at",
            MessageStatus::Clicked => "clicked_at",
            MessageStatus::Unsubscribed => "unsubscribed_at",
        };
        let sql = format!(
            r#"
            UPDATE sent_emails
            SET {ts} = $2,
                status = CASE WHEN ({current_rank}) < ({new_rank}) THEN $3 ELSE status END
            WHERE id = $1
            "#,
            ts = ts_column,
            current_rank = rank_expr("status"),
            new_rank = rank_expr("$3"),
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .bind(status.as_str())
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    pub async fn record_open(
        &self,
        id: Uuid,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE sent_emails
            SET open_count = open_count + 1,
                last_opened_at = NOW(),
                user_agent = COALESCE($2, user_agent),
                ip_address = COALESCE($3, ip_address)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(user_agent)
        .bind(ip_address)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn record_click(
        &self,
        id: Uuid,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE sent_emails
            SET click_count = click_count + 1,
                last_clicked_at = NOW(),
                user_agent = COALESCE($2, user_agent),
                ip_address = COALESCE($3, ip_address)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(user_agent)
        .bind(ip_address)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Recipients with a send record in this campaign (warm-up dedup scope).
    pub async fn sent_recipients_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<HashSet<String>, ServiceError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT recipient_email FROM sent_emails WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.into_iter().map(|(e,)| e).collect())
    }

    /// Recipients with a send record in any campaign (global suppression).
    pub async fn sent_recipients_global(&self) -> Result<HashSet<String>, ServiceError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT recipient_email FROM sent_emails")
                .fetch_all(self.pool.as_ref())
                .await?;
        Ok(rows.into_iter().map(|(e,)| e).collect())
    }

    /// Warm-up cycle reset: the sole legal deletion of sent_emails rows.
    pub async fn delete_for_campaign(&self, campaign_id: Uuid) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM sent_emails WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }

    /// Per-status counts plus total open/click sums for one campaign day.
    pub async fn realtime_counts(
        &self,
        campaign_id: Uuid,
        day: i32,
    ) -> Result<Vec<(String, i64, i64, i64)>, ServiceError> {
        Ok(sqlx::query_as(
            r#"
            SELECT status, COUNT(*), COALESCE(SUM(open_count), 0)::bigint, COALESCE(SUM(click_count), 0)::bigint
            FROM sent_emails
            WHERE campaign_id = $1 AND day = $2
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .fetch_all(self.pool.as_ref())
        .await?)
    }
}
