use chrono::{DateTime, Utc};

use crate::services::campaign_store::CampaignStore;
use crate::services::orchestrator::Orchestrator;

/// Process-wide daily driver: fires once at every 00:00 UTC, plus a catch-up
/// pass on startup for downtime spanning a midnight. Campaigns transition
/// independently; one failure never blocks the rest.
pub struct DayTransitionScheduler {
    campaigns: CampaignStore,
    orchestrator: Orchestrator,
}

impl DayTransitionScheduler {
    pub fn new(campaigns: CampaignStore, orchestrator: Orchestrator) -> Self {
        Self { campaigns, orchestrator }
    }

    pub async fn run(self) {
        tracing::info!("day transition scheduler started");
        self.run_transitions().await;
        loop {
            let wait = duration_until_next_midnight_utc(Utc::now());
            tracing::debug!(seconds = wait.as_secs(), "sleeping until next UTC midnight");
            tokio::time::sleep(wait).await;
            self.run_transitions().await;
        }
    }

    pub async fn run_transitions(&self) {
        let campaigns = match self.campaigns.running().await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                tracing::error!(%e, "could not list running campaigns");
                return;
            }
        };

        for campaign in campaigns {
            match self.orchestrator.transition_day(campaign.id).await {
                Ok(true) => {
                    tracing::info!(campaign_id = %campaign.id, "campaign advanced to a new day");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(campaign_id = %campaign.id, %e, "day transition failed");
                }
            }
        }
    }
}

pub fn duration_until_next_midnight_utc(now: DateTime<Utc>) -> std::time::Duration {
    let next_midnight = (now.date_naive() + chrono::Days::new(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    (next_midnight - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_duration_until_next_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 23, 59, 0).unwrap();
        assert_eq!(duration_until_next_midnight_utc(now).as_secs(), 60);

        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(duration_until_next_midnight_utc(now).as_secs(), 86_400);
    }
}
