use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::models::plan::DailyPlan;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub template_names: Vec<String>,
    pub status: String,
    pub created_by: Option<String>,

    // Configuration. Immutable while the campaign is running.
    pub domains: Vec<String>,
    pub sender_emails: serde_json::Value,
    pub base_daily_total: i32,
    pub target_sum: i32,
    pub quota_days: i32,
    pub max_email_percentage: f32,
    pub randomization_intensity: f32,
    pub email_list_source: String,
    pub custom_email_list_key: Option<String>,
    pub warmup_enabled: bool,
    pub warmup_current_index: i32,
    pub template_data: serde_json::Value,

    // Progress
    pub current_day: i32,
    pub started_on_utc_day: Option<NaiveDate>,
    pub last_day_transition_at: Option<DateTime<Utc>>,
    pub total_sent: i32,
    pub total_delivered: i32,
    pub total_failed: i32,
    pub total_bounced: i32,
    pub total_opened: i32,
    pub total_clicked: i32,
    pub total_unsubscribed: i32,
    pub last_sent_at: Option<DateTime<Utc>>,

    // Generated plans, append-only
    pub plan_total_recipients: i32,
    pub plan_email_list_stats: serde_json::Value,
    pub daily_plans: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub started_by: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SenderEmail {
    pub email: String,
    pub domain: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Campaign {
    pub fn is_running(&self) -> bool {
        self.status == CampaignStatus::Running.as_str()
    }

    pub fn sender_emails(&self) -> Vec<SenderEmail> {
        serde_json::from_value(self.sender_emails.clone()).unwrap_or_default()
    }

    /// Active configured senders for one domain, in configuration order.
    pub fn active_senders_for_domain(&self, domain: &str) -> Vec<SenderEmail> {
        self.sender_emails()
            .into_iter()
            .filter(|s| s.active && s.domain == domain)
            .collect()
    }

    pub fn template_data_map(&self) -> HashMap<String, String> {
        serde_json::from_value(self.template_data.clone()).unwrap_or_default()
    }

    pub fn daily_plans(&self) -> Vec<DailyPlan> {
        serde_json::from_value(self.daily_plans.clone()).unwrap_or_default()
    }

    pub fn plan_for_day(&self, day: i32) -> Option<DailyPlan> {
        self.daily_plans().into_iter().find(|p| p.day == day)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCampaignRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1))]
    pub template_names: Vec<String>,
    #[validate(length(min = 1))]
    pub domains: Vec<String>,
    pub sender_emails: Vec<SenderEmailRequest>,
    #[validate(range(min = 1))]
    pub base_daily_total: i32,
    #[validate(range(min = 1))]
    pub target_sum: i32,
    #[validate(range(min = 1, max = 365))]
    pub quota_days: i32,
    #[validate(range(min = 1.0, max = 100.0))]
    pub max_email_percentage: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub randomization_intensity: f32,
    pub email_list_source: Option<String>,
    pub custom_email_list_key: Option<String>,
    #[serde(default)]
    pub warmup_enabled: bool,
    #[serde(default)]
    pub template_data: HashMap<String, String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SenderEmailRequest {
    #[validate(email)]
    pub email: String,
    pub domain: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl SenderEmailRequest {
    /// Domain defaults to the address's own domain part.
    pub fn into_sender(self) -> SenderEmail {
        let domain = self
            .domain
            .unwrap_or_else(|| self.email.split('@').nth(1).unwrap_or_default().to_string());
        SenderEmail { email: self.email, domain, active: self.active }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSenderEmailRequest {
    #[validate(email)]
    pub email: Option<String>,
    pub domain: Option<String>,
    pub active: Option<bool>,
}
