use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;

pub const JOB_TYPE_SEND_EMAIL: &str = "send_email";
pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const ENQUEUE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Payload of one delayed send job. `scheduled_for` is duplicated into a
/// column so claiming and staleness checks never parse JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJobPayload {
    pub campaign_id: Uuid,
    pub recipient_email: String,
    pub recipient_domain: String,
    pub sender_email: String,
    pub sender_domain: String,
    pub template_name: String,
    pub template_data: HashMap<String, String>,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn email_payload(&self) -> Result<EmailJobPayload, ServiceError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ServiceError::TransientIo(format!("invalid job payload: {}", e)))
    }
}

/// Waiting/delayed/active/completed/failed depth for one campaign.
#[derive(Debug, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Durable delayed-job queue over the jobs table. Jobs become claimable once
/// `scheduled_for` passes; claims use FOR UPDATE SKIP LOCKED so concurrent
/// workers never double-pop; FIFO within equal (scheduled_for, priority).
#[derive(Clone)]
pub struct DeliveryQueue {
    pool: Arc<PgPool>,
}

impl DeliveryQueue {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn enqueue_email(
        &self,
        payload: &EmailJobPayload,
        priority: i32,
    ) -> Result<Uuid, ServiceError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, campaign_id, job_type, payload, status, priority,
                              scheduled_for, retry_count, max_retries, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, 0, $7, NOW())
            "#,
        )
        .bind(id)
        .bind(payload.campaign_id)
        .bind(JOB_TYPE_SEND_EMAIL)
        .bind(serde_json::to_value(payload).map_err(|e| ServiceError::TransientIo(e.to_string()))?)
        .bind(priority)
        .bind(payload.scheduled_for)
        .bind(DEFAULT_MAX_RETRIES)
        .execute(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    /// Bulk enqueue in chunks; scheduling a large day can push tens of
    /// thousands of jobs.
    pub async fn enqueue_email_batch(
        &self,
        payloads: &[EmailJobPayload],
    ) -> Result<usize, ServiceError> {
        let mut inserted = 0;
        for chunk in payloads.chunks(ENQUEUE_BATCH_SIZE) {
            let mut builder = sqlx::QueryBuilder::new(
                "INSERT INTO jobs (id, campaign_id, job_type, payload, status, priority, \
                 scheduled_for, retry_count, max_retries, created_at) ",
            );
            builder.push_values(chunk, |mut b, payload| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(payload.campaign_id)
                    .push_bind(JOB_TYPE_SEND_EMAIL)
                    .push_bind(serde_json::to_value(payload).unwrap_or_default())
                    .push("'pending'")
                    .push_bind(0i32)
                    .push_bind(payload.scheduled_for)
                    .push_bind(0i32)
                    .push_bind(DEFAULT_MAX_RETRIES)
                    .push("NOW()");
            });
            builder.build().execute(self.pool.as_ref()).await?;
            inserted += chunk.len();
        }
        Ok(inserted)
    }

    /// Atomically claims due jobs with SELECT FOR UPDATE SKIP LOCKED so
    /// multiple workers can run against the same table.
    pub async fn claim_due_jobs(&self, limit: i64) -> Result<Vec<Job>, ServiceError> {
        Ok(sqlx::query_as::<_, Job>(
            r#"
            WITH claimed AS (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND scheduled_for <= NOW())
                   OR (status = 'scheduled' AND next_retry_at <= NOW())
                ORDER BY scheduled_for ASC, priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                started_at = NOW(),
                retry_count = retry_count + 1
            FROM claimed
            WHERE jobs.id = claimed.id
            RETURNING jobs.id, jobs.campaign_id, jobs.job_type, jobs.payload, jobs.status,
                      jobs.priority, jobs.scheduled_for, jobs.retry_count, jobs.max_retries,
                      jobs.created_at
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query("UPDATE jobs SET status = 'completed', completed_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// Exponential backoff starting at 2 s (2s, 4s); terminally failed once
    /// the attempt budget is spent.
    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = CASE WHEN retry_count >= max_retries THEN 'failed' ELSE 'scheduled' END,
                error = $2,
                next_retry_at = CASE
                    WHEN retry_count < max_retries
                    THEN NOW() + interval '2 seconds' * POWER(2, retry_count - 1)
                    ELSE NULL
                END
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Jobs of one campaign in a given queue state. `waiting` and `delayed`
    /// partition the pending set by whether `scheduled_for` has passed.
    pub async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
        state: &str,
    ) -> Result<Vec<Job>, ServiceError> {
        let condition = match state {
            "waiting" => "status = 'pending' AND scheduled_for <= NOW()",
            "delayed" => "((status = 'pending' AND scheduled_for > NOW()) OR status = 'scheduled')",
            "active" => "status = 'processing'",
            "completed" => "status = 'completed'",
            "failed" => "status = 'failed'",
            other => {
                return Err(ServiceError::Validation(format!("unknown queue state: {}", other)))
            }
        };
        let sql = format!(
            "SELECT id, campaign_id, job_type, payload, status, priority, scheduled_for, \
             retry_count, max_retries, created_at FROM jobs \
             WHERE campaign_id = $1 AND {} ORDER BY scheduled_for ASC",
            condition
        );
        Ok(sqlx::query_as::<_, Job>(&sql)
            .bind(campaign_id)
            .fetch_all(self.pool.as_ref())
            .await?)
    }

    pub async fn counts_by_campaign(&self, campaign_id: Uuid) -> Result<QueueCounts, ServiceError> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_for <= NOW()),
                COUNT(*) FILTER (WHERE (status = 'pending' AND scheduled_for > NOW()) OR status = 'scheduled'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM jobs
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(QueueCounts {
            waiting: row.0,
            delayed: row.1,
            active: row.2,
            completed: row.3,
            failed: row.4,
        })
    }

    /// Removes every waiting, delayed and active job for one campaign. This
    /// is the cancellation primitive behind pause/resume/complete/day
    /// transitions; the global queue is never paused.
    pub async fn remove_by_campaign(&self, campaign_id: Uuid) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE campaign_id = $1 AND status IN ('pending', 'scheduled', 'processing')",
        )
        .bind(campaign_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    /// Retention sweep: completed jobs kept 24 h up to a cap, failed jobs
    /// kept 7 days (both configurable).
    pub async fn cleanup_retention(
        &self,
        completed_hours: i64,
        completed_max: i64,
        failed_days: i64,
    ) -> Result<u64, ServiceError> {
        let mut removed = 0;

        let result = sqlx::query(
            "DELETE FROM jobs WHERE status = 'completed' AND completed_at < NOW() - ($1 || ' hours')::interval",
        )
        .bind(completed_hours.to_string())
        .execute(self.pool.as_ref())
        .await?;
        removed += result.rows_affected();

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = 'completed' AND id NOT IN (
                SELECT id FROM jobs WHERE status = 'completed'
                ORDER BY completed_at DESC LIMIT $1
            )
            "#,
        )
        .bind(completed_max)
        .execute(self.pool.as_ref())
        .await?;
        removed += result.rows_affected();

        let result = sqlx::query(
            "DELETE FROM jobs WHERE status = 'failed' AND completed_at IS NULL AND created_at < NOW() - ($1 || ' days')::interval",
        )
        .bind(failed_days.to_string())
        .execute(self.pool.as_ref())
        .await?;
        removed += result.rows_affected();

        Ok(removed)
    }
}
