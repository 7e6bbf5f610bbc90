use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One day of the send schedule: domain -> sender -> hour -> minute counts.
/// Stored as JSON inside the campaign's `daily_plans` array, one entry per day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPlan {
    pub day: i32,
    pub total_emails: i64,
    pub domains: Vec<DomainPlan>,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPlan {
    pub domain: String,
    pub total_emails: i64,
    pub senders: Vec<SenderPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderPlan {
    pub email: String,
    pub total_emails: i64,
    pub hours: Vec<HourPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourPlan {
    pub hour: u32,
    pub count: i64,
    /// 60 entries, one per minute; sums to `count`.
    pub minutes: Vec<i64>,
}

impl DailyPlan {
    /// Sum reconciliation across every level of the tree.
    pub fn is_consistent(&self) -> bool {
        let mut domain_sum = 0i64;
        for domain in &self.domains {
            let mut sender_sum = 0i64;
            for sender in &domain.senders {
                let mut hour_sum = 0i64;
                for hour in &sender.hours {
                    if hour.minutes.iter().sum::<i64>() != hour.count {
                        return false;
                    }
                    hour_sum += hour.count;
                }
                if hour_sum != sender.total_emails {
                    return false;
                }
                sender_sum += sender.total_emails;
            }
            if sender_sum != domain.total_emails {
                return false;
            }
            domain_sum += domain.total_emails;
        }
        domain_sum == self.total_emails
    }
}

/// Aggregate stats about the recipient list captured when a plan is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailListStats {
    pub total_in_list: i64,
    pub suppressed_sent: i64,
    pub suppressed_unsubscribed: i64,
    pub eligible: i64,
}
