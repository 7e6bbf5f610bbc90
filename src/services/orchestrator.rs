use chrono::{NaiveDate, Utc};
use handlebars::Handlebars;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use crate::error::ServiceError;
use crate::models::campaign::{
    Campaign, CreateCampaignRequest, SenderEmail, SenderEmailRequest, UpdateSenderEmailRequest,
};
use crate::models::plan::DailyPlan;
use crate::services::campaign_store::CampaignStore;
use crate::services::delivery_queue::{DeliveryQueue, EmailJobPayload};
use crate::services::event_bus::EventBus;
use crate::services::plan_generator::build_daily_plan;
use crate::services::randomizer::Randomizer;
use crate::services::recipient_pool::{warmup_window, RecipientPool};

/// Campaign lifecycle state machine and the plan -> jobs pipeline.
///
/// Transitions are serialized per campaign through an async mutex; the
/// planning and scheduling work detaches onto the runtime so callers return
/// immediately, with failures funneled into the `failed` state rather than
/// swallowed.
#[derive(Clone)]
pub struct Orchestrator {
    campaigns: CampaignStore,
    queue: DeliveryQueue,
    recipients: RecipientPool,
    bus: EventBus,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl Orchestrator {
    pub fn new(
        campaigns: CampaignStore,
        queue: DeliveryQueue,
        recipients: RecipientPool,
        bus: EventBus,
    ) -> Self {
        Self { campaigns, queue, recipients, bus, locks: Arc::new(Mutex::new(HashMap::new())) }
    }

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn create_campaign(
        &self,
        req: CreateCampaignRequest,
    ) -> Result<Campaign, ServiceError> {
        req.validate().map_err(|e| ServiceError::Validation(e.to_string()))?;
        for sender in &req.sender_emails {
            sender.validate().map_err(|e| ServiceError::Validation(e.to_string()))?;
        }
        self.campaigns.create(req).await
    }

    pub async fn get_campaign(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        self.campaigns.find(id).await
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>, ServiceError> {
        self.campaigns.list().await
    }

    /// draft/paused/completed -> running. Residual jobs are purged, then the
    /// plan+schedule pipeline runs detached.
    pub async fn start(&self, id: Uuid, started_by: Option<&str>) -> Result<Campaign, ServiceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let campaign = self.campaigns.find(id).await?;
        if !self.campaigns.mark_running(id, started_by).await? {
            return Err(ServiceError::ConflictingState(format!(
                "cannot start campaign in status {}",
                campaign.status
            )));
        }
        self.queue.remove_by_campaign(id).await?;
        self.bus.publish("campaign_started", id, serde_json::json!({}));

        self.spawn_pipeline(id, false);
        self.campaigns.find(id).await
    }

    /// running -> paused. Only this campaign's jobs leave the queue; the
    /// global worker pool never stops.
    pub async fn pause(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let campaign = self.campaigns.find(id).await?;
        if !self.campaigns.mark_paused(id).await? {
            return Err(ServiceError::ConflictingState(format!(
                "cannot pause campaign in status {}",
                campaign.status
            )));
        }
        let removed = self.queue.remove_by_campaign(id).await?;
        tracing::info!(campaign_id = %id, removed, "campaign paused");
        self.bus.publish("campaign_paused", id, serde_json::json!({ "removedJobs": removed }));
        self.campaigns.find(id).await
    }

    /// paused -> running. Reuses the stored plan for the current day when one
    /// exists, regenerates otherwise.
    pub async fn resume(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let campaign = self.campaigns.find(id).await?;
        if !self.campaigns.mark_resumed(id).await? {
            return Err(ServiceError::ConflictingState(format!(
                "cannot resume campaign in status {}",
                campaign.status
            )));
        }
        self.queue.remove_by_campaign(id).await?;
        self.bus.publish("campaign_resumed", id, serde_json::json!({}));

        self.spawn_pipeline(id, true);
        self.campaigns.find(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let campaign = self.campaigns.find(id).await?;
        if campaign.is_running() {
            return Err(ServiceError::ConflictingState(
                "cannot delete a running campaign".into(),
            ));
        }
        self.queue.remove_by_campaign(id).await?;
        self.campaigns.delete(id).await?;
        Ok(())
    }

    /// Advances a running campaign to the day implied by the UTC calendar,
    /// completing it instead when the recipient pool is exhausted. Returns
    /// true when a transition happened.
    pub async fn transition_day(&self, id: Uuid) -> Result<bool, ServiceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let campaign = self.campaigns.find(id).await?;
        if !campaign.is_running() {
            return Err(ServiceError::ConflictingState(
                "day transitions only apply to running campaigns".into(),
            ));
        }
        let started_on = campaign.started_on_utc_day.ok_or_else(|| {
            ServiceError::ConflictingState("running campaign has no start day".into())
        })?;

        let new_day = day_for_date(started_on, Utc::now().date_naive());
        if new_day == campaign.current_day {
            return Ok(false);
        }

        // Completion check runs on the dedup scope in force; warm-up
        // campaigns recycle their pool instead of completing.
        if !campaign.warmup_enabled {
            let eligible = self.recipients.eligible_for(&campaign).await?;
            if eligible.emails.is_empty() {
                self.complete_locked(id).await?;
                return Ok(true);
            }
        }

        self.queue.remove_by_campaign(id).await?;
        self.campaigns.set_current_day(id, new_day).await?;
        self.bus.publish(
            "day_transitioned",
            id,
            serde_json::json!({ "day": new_day, "previousDay": campaign.current_day }),
        );

        match self.plan_and_schedule(id, false).await {
            Ok(_) => Ok(true),
            Err(e) => {
                self.fail_campaign(id, "day transition", &e).await;
                Err(e)
            }
        }
    }

    /// Rebuilds the current day's plan. A running campaign is also
    /// rescheduled; a non-running one just gets the plan appended for
    /// inspection.
    pub async fn regenerate_plan(&self, id: Uuid) -> Result<DailyPlan, ServiceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let campaign = self.campaigns.find(id).await?;
        if campaign.is_running() {
            self.queue.remove_by_campaign(id).await?;
            match self.plan_and_schedule(id, false).await {
                Ok(_) => {}
                Err(e) => {
                    self.fail_campaign(id, "plan regeneration", &e).await;
                    return Err(e);
                }
            }
        } else {
            let eligible = self.recipients.eligible_for(&campaign).await?;
            let mut randomizer = Randomizer::new();
            let plan = build_daily_plan(
                &mut randomizer,
                &campaign,
                campaign.current_day,
                eligible.emails.len() as i64,
            );
            self.campaigns
                .append_daily_plan(id, &plan, eligible.stats.total_in_list, &eligible.stats)
                .await?;
        }

        let campaign = self.campaigns.find(id).await?;
        campaign
            .plan_for_day(campaign.current_day)
            .ok_or(ServiceError::NotFound("daily plan"))
    }

    /// Builds a plan for an arbitrary day without persisting anything.
    pub async fn simulate_daily_plan(
        &self,
        id: Uuid,
        day: Option<i32>,
    ) -> Result<DailyPlan, ServiceError> {
        let campaign = self.campaigns.find(id).await?;
        let eligible = self.recipients.eligible_for(&campaign).await?;
        let mut randomizer = Randomizer::new();
        Ok(build_daily_plan(
            &mut randomizer,
            &campaign,
            day.unwrap_or(campaign.current_day),
            eligible.emails.len() as i64,
        ))
    }

    pub async fn get_campaign_plan(&self, id: Uuid) -> Result<serde_json::Value, ServiceError> {
        let campaign = self.campaigns.find(id).await?;
        Ok(serde_json::json!({
            "totalRecipients": campaign.plan_total_recipients,
            "emailListStats": campaign.plan_email_list_stats,
            "dailyPlans": campaign.daily_plans,
        }))
    }

    pub async fn get_todays_plan(&self, id: Uuid) -> Result<DailyPlan, ServiceError> {
        let campaign = self.campaigns.find(id).await?;
        campaign
            .plan_for_day(campaign.current_day)
            .ok_or(ServiceError::NotFound("daily plan"))
    }

    /// Today's plan plus live queue depth, the view the UI polls while a
    /// campaign runs.
    pub async fn get_current_execution_plan(
        &self,
        id: Uuid,
    ) -> Result<serde_json::Value, ServiceError> {
        let campaign = self.campaigns.find(id).await?;
        let plan = campaign.plan_for_day(campaign.current_day);
        let queue = self.queue.counts_by_campaign(id).await?;
        Ok(serde_json::json!({
            "campaignId": id,
            "status": campaign.status,
            "currentDay": campaign.current_day,
            "plan": plan,
            "queue": queue,
            "progress": {
                "totalSent": campaign.total_sent,
                "totalDelivered": campaign.total_delivered,
                "totalFailed": campaign.total_failed,
                "totalBounced": campaign.total_bounced,
                "totalOpened": campaign.total_opened,
                "totalClicked": campaign.total_clicked,
            },
        }))
    }

    pub async fn add_sender_email(
        &self,
        id: Uuid,
        req: SenderEmailRequest,
    ) -> Result<Campaign, ServiceError> {
        req.validate().map_err(|e| ServiceError::Validation(e.to_string()))?;
        let campaign = self.campaigns.ensure_not_running(id).await?;
        let sender = req.into_sender();
        if campaign.sender_emails().iter().any(|s| s.email == sender.email) {
            return Err(ServiceError::Validation("sender email already configured".into()));
        }
        self.campaigns.add_sender_email(id, &sender).await?;
        self.campaigns.find(id).await
    }

    pub async fn update_sender_email(
        &self,
        id: Uuid,
        email: &str,
        req: UpdateSenderEmailRequest,
    ) -> Result<Campaign, ServiceError> {
        req.validate().map_err(|e| ServiceError::Validation(e.to_string()))?;
        let campaign = self.campaigns.ensure_not_running(id).await?;
        let existing = campaign
            .sender_emails()
            .into_iter()
            .find(|s| s.email == email)
            .ok_or(ServiceError::NotFound("sender email"))?;

        let updated = SenderEmail {
            email: req.email.unwrap_or(existing.email),
            domain: req.domain.unwrap_or(existing.domain),
            active: req.active.unwrap_or(existing.active),
        };
        if !self.campaigns.update_sender_email(id, email, &updated).await? {
            return Err(ServiceError::NotFound("sender email"));
        }
        self.campaigns.find(id).await
    }

    pub async fn remove_sender_email(&self, id: Uuid, email: &str) -> Result<Campaign, ServiceError> {
        let campaign = self.campaigns.ensure_not_running(id).await?;
        if !campaign.sender_emails().iter().any(|s| s.email == email) {
            return Err(ServiceError::NotFound("sender email"));
        }
        self.campaigns.remove_sender_email(id, email).await?;
        self.campaigns.find(id).await
    }

    /// Detached plan+schedule run. Anything unexpected flips the campaign to
    /// failed instead of disappearing into a dropped task.
    fn spawn_pipeline(&self, id: Uuid, reuse_plan: bool) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.plan_and_schedule(id, reuse_plan).await {
                this.fail_campaign(id, "plan and schedule", &e).await;
            }
        });
    }

    async fn fail_campaign(&self, id: Uuid, context: &str, error: &ServiceError) {
        tracing::error!(campaign_id = %id, context, %error, "campaign failed");
        let message = format!("{}: {}", context, error);
        if let Err(e) = self.campaigns.mark_failed(id, &message).await {
            tracing::error!(campaign_id = %id, %e, "could not record campaign failure");
        }
        if let Err(e) = self.queue.remove_by_campaign(id).await {
            tracing::error!(campaign_id = %id, %e, "could not purge jobs of failed campaign");
        }
        self.bus.publish("campaign_failed", id, serde_json::json!({ "error": message }));
    }

    /// The pipeline behind start/resume/day transitions: eligibility ->
    /// (reused or fresh) plan -> delayed jobs.
    async fn plan_and_schedule(&self, id: Uuid, reuse_plan: bool) -> Result<(), ServiceError> {
        let campaign = self.campaigns.find(id).await?;
        if !campaign.is_running() {
            return Ok(());
        }

        let eligible = self.recipients.eligible_for(&campaign).await?;
        if eligible.cycle_reset {
            self.campaigns.set_warmup_index(id, 0).await?;
        }
        if eligible.emails.is_empty() {
            if !campaign.warmup_enabled {
                tracing::info!(campaign_id = %id, "recipient pool exhausted, completing");
                self.complete_locked(id).await?;
            }
            return Ok(());
        }

        let plan = match campaign.plan_for_day(campaign.current_day) {
            Some(existing) if reuse_plan => existing,
            _ => {
                let mut randomizer = Randomizer::new();
                let plan = build_daily_plan(
                    &mut randomizer,
                    &campaign,
                    campaign.current_day,
                    eligible.emails.len() as i64,
                );
                self.campaigns
                    .append_daily_plan(id, &plan, eligible.stats.total_in_list, &eligible.stats)
                    .await?;
                plan
            }
        };

        let recipients = if campaign.warmup_enabled {
            let index = if eligible.cycle_reset { 0 } else { campaign.warmup_current_index.max(0) as usize };
            let (window, next_index) =
                warmup_window(&eligible.emails, index, plan.total_emails.max(0) as usize);
            self.campaigns.set_warmup_index(id, next_index as i32).await?;
            window
        } else {
            eligible.emails
        };

        let payloads = schedule_jobs(&campaign, &plan, &recipients, Utc::now());
        let scheduled = self.queue.enqueue_email_batch(&payloads).await?;
        tracing::info!(
            campaign_id = %id,
            day = plan.day,
            planned = plan.total_emails,
            scheduled,
            "daily schedule enqueued"
        );
        Ok(())
    }

    async fn complete_locked(&self, id: Uuid) -> Result<(), ServiceError> {
        if self.campaigns.mark_completed(id).await? {
            self.queue.remove_by_campaign(id).await?;
            self.bus.publish("campaign_completed", id, serde_json::json!({}));
        }
        Ok(())
    }
}

/// 1-based campaign day for a UTC calendar date.
pub fn day_for_date(started_on: NaiveDate, today: NaiveDate) -> i32 {
    (today - started_on).num_days() as i32 + 1
}

/// Walks the plan tree cell by cell, pops recipients in order and emits one
/// delayed job per cell slot that still fits inside today's UTC window.
/// Messages within a minute spread over its seconds; the template is drawn
/// uniformly per message.
pub fn schedule_jobs(
    campaign: &Campaign,
    plan: &DailyPlan,
    recipients: &[String],
    now: chrono::DateTime<Utc>,
) -> Vec<EmailJobPayload> {
    let today = now.date_naive();
    let end_of_day = today
        .and_hms_opt(23, 59, 59)
        .map(|t| t.and_utc())
        .unwrap_or(now);

    let template_data = campaign.template_data_map();
    let mut rng = rand::thread_rng();
    let mut iter = recipients.iter();
    let mut payloads = Vec::new();

    'domains: for domain_plan in &plan.domains {
        for sender in &domain_plan.senders {
            let sender_domain = sender.email.split('@').nth(1).unwrap_or(&domain_plan.domain);
            for hour_plan in &sender.hours {
                for (minute, &count) in hour_plan.minutes.iter().enumerate() {
                    for i in 0..count {
                        let recipient = match iter.next() {
                            Some(r) => r,
                            None => break 'domains,
                        };
                        let second = (i * 60 / count) as u32;
                        let target = match today.and_hms_opt(hour_plan.hour, minute as u32, second)
                        {
                            Some(t) => t.and_utc(),
                            None => continue,
                        };
                        if target <= now || target > end_of_day {
                            continue;
                        }

                        let template_name = campaign
                            .template_names
                            .choose(&mut rng)
                            .cloned()
                            .unwrap_or_else(|| "default".to_string());
                        let variables = render_template_vars(
                            &campaign.name,
                            &template_data,
                            recipient,
                            plan.day,
                        );

                        payloads.push(EmailJobPayload {
                            campaign_id: campaign.id,
                            recipient_email: recipient.clone(),
                            recipient_domain: recipient
                                .split('@')
                                .nth(1)
                                .unwrap_or_default()
                                .to_string(),
                            sender_email: sender.email.clone(),
                            sender_domain: sender_domain.to_string(),
                            template_name,
                            template_data: variables,
                            day: plan.day,
                            hour: hour_plan.hour as i32,
                            minute: minute as i32,
                            second: second as i32,
                            scheduled_for: target,
                        });
                    }
                }
            }
        }
    }
    payloads
}

/// Template variables for one message: built-ins first, then each configured
/// value with `{{var}}` occurrences substituted from the built-ins.
/// Substitution happens here, at schedule time, not at send time.
pub fn render_template_vars(
    campaign_name: &str,
    template_data: &HashMap<String, String>,
    recipient: &str,
    day: i32,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert(
        "recipientName".to_string(),
        recipient.split('@').next().unwrap_or(recipient).to_string(),
    );
    vars.insert("recipientEmail".to_string(), recipient.to_string());
    vars.insert("campaignName".to_string(), campaign_name.to_string());
    vars.insert("day".to_string(), day.to_string());

    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(false);
    for (key, value) in template_data {
        let rendered = handlebars
            .render_template(value, &vars)
            .unwrap_or_else(|_| value.clone());
        vars.insert(key.clone(), rendered);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{DomainPlan, HourPlan, SenderPlan};
    use chrono::TimeZone;

    fn minute_counts(pairs: &[(usize, i64)]) -> Vec<i64> {
        let mut minutes = vec![0i64; 60];
        for &(m, c) in pairs {
            minutes[m] = c;
        }
        minutes
    }

    fn plan_with_cell(hour: u32, minute: usize, count: i64) -> DailyPlan {
        DailyPlan {
            day: 1,
            total_emails: count,
            domains: vec![DomainPlan {
                domain: "corp.com".into(),
                total_emails: count,
                senders: vec![SenderPlan {
                    email: "s1@corp.com".into(),
                    total_emails: count,
                    hours: vec![HourPlan {
                        hour,
                        count,
                        minutes: minute_counts(&[(minute, count)]),
                    }],
                }],
            }],
            scheduled_at: Utc::now(),
        }
    }

    fn test_campaign() -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "ramp".into(),
            template_names: vec!["welcome".into()],
            status: "running".into(),
            created_by: None,
            domains: vec!["corp.com".into()],
            sender_emails: serde_json::json!([]),
            base_daily_total: 10,
            target_sum: 100,
            quota_days: 7,
            max_email_percentage: 100.0,
            randomization_intensity: 0.0,
            email_list_source: "global".into(),
            custom_email_list_key: None,
            warmup_enabled: false,
            warmup_current_index: 0,
            template_data: serde_json::json!({
                "greeting": "Hello {{recipientName}}, welcome to {{campaignName}}"
            }),
            current_day: 1,
            started_on_utc_day: None,
            last_day_transition_at: None,
            total_sent: 0,
            total_delivered: 0,
            total_failed: 0,
            total_bounced: 0,
            total_opened: 0,
            total_clicked: 0,
            total_unsubscribed: 0,
            last_sent_at: None,
            plan_total_recipients: 0,
            plan_email_list_stats: serde_json::json!({}),
            daily_plans: serde_json::json!([]),
            created_at: Utc::now(),
            started_at: None,
            started_by: None,
            paused_at: None,
            completed_at: None,
            failed_at: None,
            error_message: None,
        }
    }

    #[test]
    fn test_day_for_date() {
        let started = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(day_for_date(started, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), 1);
        assert_eq!(day_for_date(started, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()), 3);
    }

    #[test]
    fn test_schedule_spreads_seconds_within_minute() {
        let campaign = test_campaign();
        let plan = plan_with_cell(12, 30, 4);
        let recipients: Vec<String> = (0..4).map(|i| format!("u{}@x.com", i)).collect();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let jobs = schedule_jobs(&campaign, &plan, &recipients, now);
        assert_eq!(jobs.len(), 4);
        let seconds: Vec<i32> = jobs.iter().map(|j| j.second).collect();
        assert_eq!(seconds, vec![0, 15, 30, 45]);
        for job in &jobs {
            assert_eq!(job.hour, 12);
            assert_eq!(job.minute, 30);
            assert!(job.scheduled_for > now);
        }
    }

    #[test]
    fn test_schedule_skips_past_cells() {
        let campaign = test_campaign();
        let plan = plan_with_cell(6, 0, 3);
        let recipients: Vec<String> = (0..3).map(|i| format!("u{}@x.com", i)).collect();
        // It's already afternoon; the 06:00 cell is in the past.
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
        let jobs = schedule_jobs(&campaign, &plan, &recipients, now);
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_schedule_stops_when_recipients_run_out() {
        let campaign = test_campaign();
        let plan = plan_with_cell(20, 0, 5);
        let recipients = vec!["only@x.com".to_string()];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let jobs = schedule_jobs(&campaign, &plan, &recipients, now);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].recipient_email, "only@x.com");
    }

    #[test]
    fn test_template_vars_substitution() {
        let mut data = HashMap::new();
        data.insert("greeting".to_string(), "Hi {{recipientName}}, day {{day}}".to_string());
        data.insert("plain".to_string(), "no placeholders".to_string());

        let vars = render_template_vars("Warmup Q3", &data, "jane.doe@corp.com", 4);
        assert_eq!(vars["recipientName"], "jane.doe");
        assert_eq!(vars["recipientEmail"], "jane.doe@corp.com");
        assert_eq!(vars["campaignName"], "Warmup Q3");
        assert_eq!(vars["day"], "4");
        assert_eq!(vars["greeting"], "Hi jane.doe, day 4");
        assert_eq!(vars["plain"], "no placeholders");
    }

    #[test]
    fn test_schedule_carries_substituted_template_data() {
        let campaign = test_campaign();
        let plan = plan_with_cell(22, 10, 1);
        let recipients = vec!["amy@x.com".to_string()];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let jobs = schedule_jobs(&campaign, &plan, &recipients, now);
        assert_eq!(jobs[0].template_data["greeting"], "Hello amy, welcome to ramp");
        assert_eq!(jobs[0].template_name, "welcome");
    }
}
