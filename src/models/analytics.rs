use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-(campaign, day) rollup. Summary counters are columns; the hourly,
/// per-domain and per-sender breakdowns live in JSONB and are mutated with
/// single-statement partial updates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyAnalytics {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub day: i32,

    pub total_sent: i32,
    pub total_delivered: i32,
    pub total_failed: i32,
    pub total_bounced: i32,
    pub total_opened: i32,
    pub total_clicked: i32,
    pub unique_opens: i32,
    pub unique_clicks: i32,

    /// 24 entries, one per hour.
    pub hourly: serde_json::Value,
    /// Map keyed by recipient domain.
    pub domains: serde_json::Value,
    /// Map keyed by sender address.
    pub senders: serde_json::Value,

    pub delivery_rate: f64,
    pub bounce_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_to_open_rate: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The pre-filled 24-hour breakdown inserted when a rollup row is created.
pub fn hourly_skeleton() -> serde_json::Value {
    let hours: Vec<serde_json::Value> = (0..24)
        .map(|h| {
            serde_json::json!({
                "hour": h,
                "sent": 0,
                "delivered": 0,
                "failed": 0,
                "bounced": 0,
                "opened": 0,
                "clicked": 0,
            })
        })
        .collect();
    serde_json::Value::Array(hours)
}

/// Live view over today's SentEmail rows plus queue depth.
#[derive(Debug, Default, Serialize)]
pub struct RealtimeStats {
    pub campaign_id: Option<Uuid>,
    pub day: i32,
    pub queued: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub bounced: i64,
    pub opened: i64,
    pub clicked: i64,
    pub unsubscribed: i64,
    pub total_opens: i64,
    pub total_clicks: i64,
    pub jobs_waiting: i64,
    pub jobs_delayed: i64,
    pub jobs_active: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hourly_skeleton_shape() {
        let skeleton = hourly_skeleton();
        let hours = skeleton.as_array().unwrap();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[9]["hour"], 9);
        assert_eq!(hours[9]["sent"], 0);
        assert_eq!(hours[23]["clicked"], 0);
    }
}
