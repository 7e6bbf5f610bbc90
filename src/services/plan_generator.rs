use chrono::Utc;

use crate::models::campaign::Campaign;
use crate::models::plan::{DailyPlan, DomainPlan, HourPlan, SenderPlan};
use crate::services::randomizer::Randomizer;

pub const DEFAULT_SENDERS_PER_DOMAIN: usize = 5;

/// Builds one day's send schedule: quota -> domain split -> sender split ->
/// hourly curve -> minute jitter. Pure given the randomizer, so a seeded
/// randomizer reproduces the plan exactly.
pub fn build_daily_plan(
    randomizer: &mut Randomizer,
    campaign: &Campaign,
    day: i32,
    available_recipients: i64,
) -> DailyPlan {
    let quota = randomizer.daily_quota(
        day,
        campaign.base_daily_total,
        campaign.quota_days,
        campaign.target_sum,
        campaign.randomization_intensity,
    );
    let daily_total = quota.min(available_recipients).max(0);

    let num_senders = senders_per_domain(campaign);
    let domain_counts = randomizer.split(daily_total, campaign.domains.len());

    let mut domains = Vec::with_capacity(campaign.domains.len());
    for (domain, &domain_total) in campaign.domains.iter().zip(domain_counts.iter()) {
        let mut senders = Vec::new();
        if domain_total > 0 {
            let sender_counts = randomizer.split_with_cap(
                domain_total,
                num_senders,
                campaign.max_email_percentage,
                campaign.randomization_intensity,
            );
            let configured = campaign.active_senders_for_domain(domain);

            for (i, &sender_total) in sender_counts.iter().enumerate() {
                if sender_total == 0 {
                    continue;
                }
                let email = configured
                    .get(i)
                    .map(|s| s.email.clone())
                    .unwrap_or_else(|| format!("sender{}@{}", i + 1, domain));

                let hourly = randomizer
                    .hourly_distribution(sender_total, campaign.randomization_intensity);
                let hours: Vec<HourPlan> = hourly
                    .iter()
                    .enumerate()
                    .filter(|(_, &count)| count > 0)
                    .map(|(hour, &count)| HourPlan {
                        hour: hour as u32,
                        count,
                        minutes: randomizer.minute_distribution(count),
                    })
                    .collect();

                senders.push(SenderPlan { email, total_emails: sender_total, hours });
            }
        }
        domains.push(DomainPlan {
            domain: domain.clone(),
            total_emails: domain_total,
            senders,
        });
    }

    DailyPlan { day, total_emails: daily_total, domains, scheduled_at: Utc::now() }
}

/// Max active senders across the configured domains, defaulting when the
/// configuration names none.
fn senders_per_domain(campaign: &Campaign) -> usize {
    campaign
        .domains
        .iter()
        .map(|d| campaign.active_senders_for_domain(d).len())
        .max()
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_SENDERS_PER_DOMAIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::SenderEmail;
    use uuid::Uuid;

    fn test_campaign(domains: Vec<&str>, senders: Vec<SenderEmail>) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "warmup".into(),
            template_names: vec!["t1".into()],
            status: "draft".into(),
            created_by: None,
            domains: domains.into_iter().map(String::from).collect(),
            sender_emails: serde_json::to_value(&senders).unwrap(),
            base_daily_total: 100,
            target_sum: 10_000,
            quota_days: 14,
            max_email_percentage: 40.0,
            randomization_intensity: 0.5,
            email_list_source: "global".into(),
            custom_email_list_key: None,
            warmup_enabled: false,
            warmup_current_index: 0,
            template_data: serde_json::json!({}),
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

    fn senders_for(domains: &[&str]) -> Vec<SenderEmail> {
        domains
            .iter()
            .flat_map(|d| {
                (1..=2).map(move |i| SenderEmail {
                    email: format!("s{}@{}", i, d),
                    domain: d.to_string(),
                    active: true,
                })
            })
            .collect()
    }

    #[test]
    fn test_plan_sums_reconcile_at_every_level() {
        let campaign = test_campaign(vec!["a.com", "b.com"], senders_for(&["a.com", "b.com"]));
        let mut randomizer = Randomizer::from_seed(1);
        for day in 1..=5 {
            let plan = build_daily_plan(&mut randomizer, &campaign, day, 100_000);
            assert!(plan.is_consistent(), "day {} plan does not reconcile", day);
            assert_eq!(plan.day, day);
        }
    }

    #[test]
    fn test_plan_capped_by_available_recipients() {
        let campaign = test_campaign(vec!["a.com"], senders_for(&["a.com"]));
        let mut randomizer = Randomizer::from_seed(1);
        let plan = build_daily_plan(&mut randomizer, &campaign, 1, 7);
        assert_eq!(plan.total_emails, 7);
        assert!(plan.is_consistent());
    }

    #[test]
    fn test_plan_uses_configured_senders_then_fallback() {
        let senders = vec![SenderEmail {
            email: "only@a.com".into(),
            domain: "a.com".into(),
            active: true,
        }];
        let mut campaign = test_campaign(vec!["a.com"], senders);
        campaign.base_daily_total = 500;
        // One active sender, so every sender slot maps to it.
        let mut randomizer = Randomizer::from_seed(2);
        let plan = build_daily_plan(&mut randomizer, &campaign, 1, 100_000);
        for sender in &plan.domains[0].senders {
            assert_eq!(sender.email, "only@a.com");
        }

        // No configured senders: synthesized addresses on the domain.
        let mut campaign = test_campaign(vec!["a.com"], vec![]);
        campaign.base_daily_total = 500;
        let plan = build_daily_plan(&mut randomizer, &campaign, 1, 100_000);
        for sender in &plan.domains[0].senders {
            assert!(sender.email.ends_with("@a.com"));
            assert!(sender.email.starts_with("sender"));
        }
    }

    #[test]
    fn test_same_seed_reproduces_plan() {
        let campaign = test_campaign(vec!["a.com", "b.com"], senders_for(&["a.com", "b.com"]));
        let plan_a = build_daily_plan(&mut Randomizer::from_seed(77), &campaign, 3, 50_000);
        let plan_b = build_daily_plan(&mut Randomizer::from_seed(77), &campaign, 3, 50_000);
        assert_eq!(
            serde_json::json!({
                "total": plan_a.total_emails,
                "domains": plan_a.domains.iter().map(|d| (&d.domain, d.total_emails)).collect::<Vec<_>>(),
            }),
            serde_json::json!({
                "total": plan_b.total_emails,
                "domains": plan_b.domains.iter().map(|d| (&d.domain, d.total_emails)).collect::<Vec<_>>(),
            })
        );
        let a = serde_json::to_value(&plan_a.domains).unwrap();
        let b = serde_json::to_value(&plan_b.domains).unwrap();
        assert_eq!(a, b, "same seed must reproduce the full plan tree");
    }

    #[test]
    fn test_zero_available_produces_empty_plan() {
        let campaign = test_campaign(vec!["a.com"], senders_for(&["a.com"]));
        let mut randomizer = Randomizer::from_seed(1);
        let plan = build_daily_plan(&mut randomizer, &campaign, 1, 0);
        assert_eq!(plan.total_emails, 0);
        assert!(plan.is_consistent());
    }
}
