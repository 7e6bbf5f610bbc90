use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::campaign::{Campaign, CampaignStatus, CreateCampaignRequest, SenderEmail};
use crate::models::plan::{DailyPlan, EmailListStats};

/// Exclusive owner of the campaigns table. Every mutation is a single
/// statement with a status guard where one applies; counters are
/// `SET x = x + 1`, never materialize-then-save, so concurrent workers and
/// webhook handlers cannot lose updates.
#[derive(Clone)]
pub struct CampaignStore {
    pool: Arc<PgPool>,
}

impl CampaignStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: CreateCampaignRequest) -> Result<Campaign, ServiceError> {
        let id = Uuid::new_v4();
        let senders: Vec<SenderEmail> =
            req.sender_emails.into_iter().map(|s| s.into_sender()).collect();
        let email_list_source = req.email_list_source.unwrap_or_else(|| "global".to_string());
        if email_list_source == "custom" && req.custom_email_list_key.is_none() {
            return Err(ServiceError::Validation(
                "custom email list source requires a list key".into(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, template_names, status, created_by,
                domains, sender_emails, base_daily_total, target_sum, quota_days,
                max_email_percentage, randomization_intensity, email_list_source,
                custom_email_list_key, warmup_enabled, warmup_current_index, template_data,
                current_day, plan_email_list_stats, daily_plans, created_at
            )
            VALUES ($1, $2, $3, 'draft', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0, $15,
                    1, '{}'::jsonb, '[]'::jsonb, $16)
            "#,
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.template_names)
        .bind(&req.created_by)
        .bind(&req.domains)
        .bind(serde_json::to_value(&senders).unwrap_or_default())
        .bind(req.base_daily_total)
        .bind(req.target_sum)
        .bind(req.quota_days)
        .bind(req.max_email_percentage)
        .bind(req.randomization_intensity)
        .bind(&email_list_source)
        .bind(&req.custom_email_list_key)
        .bind(req.warmup_enabled)
        .bind(serde_json::to_value(&req.template_data).unwrap_or_default())
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        self.find(id).await
    }

    pub async fn find(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or(ServiceError::NotFound("campaign"))
    }

    pub async fn list(&self) -> Result<Vec<Campaign>, ServiceError> {
        Ok(sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns ORDER BY created_at DESC")
            .fetch_all(self.pool.as_ref())
            .await?)
    }

    pub async fn running(&self) -> Result<Vec<Campaign>, ServiceError> {
        Ok(sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE status = 'running' ORDER BY created_at ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    /// draft/paused/completed -> running. Also stamps the UTC start day the
    /// day-transition arithmetic is anchored to.
    pub async fn mark_running(&self, id: Uuid, started_by: Option<&str>) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'running',
                started_at = NOW(),
                started_by = $2,
                started_on_utc_day = (NOW() AT TIME ZONE 'utc')::date,
                paused_at = NULL,
                completed_at = NULL,
                error_message = NULL
            WHERE id = $1 AND status IN ('draft', 'paused', 'completed')
            "#,
        )
        .bind(id)
        .bind(started_by)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_paused(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'paused', paused_at = NOW() WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_resumed(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'running', paused_at = NULL WHERE id = $1 AND status = 'paused'",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'completed', completed_at = NOW() WHERE id = $1 AND status IN ('running', 'paused')",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE campaigns SET status = 'failed', failed_at = NOW(), error_message = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn inc_sent(&self, id: Uuid) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE campaigns SET total_sent = total_sent + 1, last_sent_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn inc_failed(&self, id: Uuid) -> Result<(), ServiceError> {
        self.inc_counter(id, "total_failed").await
    }

    pub async fn inc_delivered(&self, id: Uuid) -> Result<(), ServiceError> {
        self.inc_counter(id, "total_delivered").await
    }

    pub async fn inc_bounced(&self, id: Uuid) -> Result<(), ServiceError> {
        self.inc_counter(id, "total_bounced").await
    }

    pub async fn inc_opened(&self, id: Uuid) -> Result<(), ServiceError> {
        self.inc_counter(id, "total_opened").await
    }

    pub async fn inc_clicked(&self, id: Uuid) -> Result<(), ServiceError> {
        self.inc_counter(id, "total_clicked").await
    }

    pub async fn inc_unsubscribed(&self, id: Uuid) -> Result<(), ServiceError> {
        self.inc_counter(id, "total_unsubscribed").await
    }

    async fn inc_counter(&self, id: Uuid, column: &'static str) -> Result<(), ServiceError> {
        // Column names come from the fixed set above, never from input.
        let sql = format!("UPDATE campaigns SET {col} = {col} + 1 WHERE id = $1", col = column);
        sqlx::query(&sql).bind(id).execute(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Appends one generated plan; the list is append-only and ordered by day.
    pub async fn append_daily_plan(
        &self,
        id: Uuid,
        plan: &DailyPlan,
        total_recipients: i64,
        stats: &EmailListStats,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET daily_plans = daily_plans || $2::jsonb,
                plan_total_recipients = $3,
                plan_email_list_stats = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(serde_json::json!([plan]))
        .bind(total_recipients as i32)
        .bind(serde_json::to_value(stats).unwrap_or_default())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn set_warmup_index(&self, id: Uuid, index: i32) -> Result<(), ServiceError> {
        sqlx::query("UPDATE campaigns SET warmup_current_index = $2 WHERE id = $1")
            .bind(id)
            .bind(index)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    pub async fn set_current_day(&self, id: Uuid, new_day: i32) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET current_day = $2, last_day_transition_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(new_day)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_sender_email(&self, id: Uuid, sender: &SenderEmail) -> Result<(), ServiceError> {
        sqlx::query("UPDATE campaigns SET sender_emails = sender_emails || $2::jsonb WHERE id = $1")
            .bind(id)
            .bind(serde_json::json!([sender]))
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// Rewrites one sender entry in place, keeping order.
    pub async fn update_sender_email(
        &self,
        id: Uuid,
        email: &str,
        updated: &SenderEmail,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET sender_emails = (
                SELECT COALESCE(jsonb_agg(CASE WHEN e->>'email' = $2 THEN $3::jsonb ELSE e END), '[]'::jsonb)
                FROM jsonb_array_elements(sender_emails) e
            )
            WHERE id = $1 AND sender_emails @> jsonb_build_array(jsonb_build_object('email', $2::text))
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(serde_json::to_value(updated).unwrap_or_default())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_sender_email(&self, id: Uuid, email: &str) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET sender_emails = (
                SELECT COALESCE(jsonb_agg(e), '[]'::jsonb)
                FROM jsonb_array_elements(sender_emails) e
                WHERE e->>'email' <> $2
            )
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(email)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Guard used by callers that reject configuration changes mid-run.
    pub async fn ensure_not_running(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        let campaign = self.find(id).await?;
        if campaign.status == CampaignStatus::Running.as_str() {
            return Err(ServiceError::ConflictingState(
                "configuration is immutable while the campaign is running".into(),
            ));
        }
        Ok(campaign)
    }
}
