use dotenvy::dotenv;
use futures_util::StreamExt;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use mailramp::config::Config;
use mailramp::services::analytics::AnalyticsAggregator;
use mailramp::services::campaign_store::CampaignStore;
use mailramp::services::day_scheduler::DayTransitionScheduler;
use mailramp::services::delivery_queue::DeliveryQueue;
use mailramp::services::email_job::{EmailJobProcessor, JobOutcome};
use mailramp::services::event_bus::EventBus;
use mailramp::services::mail_transport;
use mailramp::services::message_store::MessageStore;
use mailramp::services::object_store::S3ObjectStore;
use mailramp::services::orchestrator::Orchestrator;
use mailramp::services::rate_limiter::RateLimiter;
use mailramp::services::recipient_pool::RecipientPool;

/// Sweep completed/failed jobs roughly once a minute of loop iterations.
const RETENTION_SWEEP_EVERY: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("Failed to create pool");
    let pool = Arc::new(pool);

    // Composition root, mirroring the API binary.
    let object_store = Arc::new(S3ObjectStore::new(config.lists_bucket.clone()).await);
    let campaigns = CampaignStore::new(pool.clone());
    let messages = MessageStore::new(pool.clone());
    let queue = DeliveryQueue::new(pool.clone());
    let bus = EventBus::default();
    let recipients = RecipientPool::new(object_store, messages.clone(), &config);
    let analytics = AnalyticsAggregator::new(pool.clone(), messages.clone(), queue.clone());
    let orchestrator =
        Orchestrator::new(campaigns.clone(), queue.clone(), recipients, bus.clone());

    let transport = mail_transport::from_config(&config)?;
    let limiter = Arc::new(RateLimiter::per_second(config.send_rate_per_second));
    let processor =
        EmailJobProcessor::new(campaigns.clone(), messages, analytics, transport, limiter, bus);

    // The daily ticker runs beside the workers and also catches up on
    // missed midnights at startup.
    let scheduler = DayTransitionScheduler::new(campaigns, orchestrator);
    tokio::spawn(scheduler.run());

    tracing::info!(
        concurrency = config.worker_concurrency,
        rate_per_second = config.send_rate_per_second,
        "mailramp worker started"
    );

    let concurrency = config.worker_concurrency;
    let mut iteration = 0u64;

    loop {
        iteration += 1;

        match queue.claim_due_jobs(concurrency as i64).await {
            Ok(jobs) => {
                if !jobs.is_empty() {
                    tracing::debug!(count = jobs.len(), "processing claimed jobs");
                }
                futures_util::stream::iter(jobs)
                    .for_each_concurrent(concurrency, |job| {
                        let processor = processor.clone();
                        let queue = queue.clone();
                        async move {
                            match processor.process(&job).await {
                                Ok(outcome) => {
                                    if let JobOutcome::Skipped(reason) = outcome {
                                        tracing::debug!(job_id = %job.id, reason, "job skipped");
                                    }
                                    if let Err(e) = queue.mark_completed(job.id).await {
                                        tracing::error!(job_id = %job.id, %e, "could not mark job completed");
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(job_id = %job.id, %e, "job failed");
                                    if let Err(mark_err) =
                                        queue.mark_failed(job.id, &e.to_string()).await
                                    {
                                        tracing::error!(job_id = %job.id, %mark_err, "could not mark job failed");
                                    }
                                }
                            }
                        }
                    })
                    .await;
            }
            Err(e) => {
                tracing::error!(%e, "error claiming jobs");
            }
        }

        if iteration % RETENTION_SWEEP_EVERY == 0 {
            match queue
                .cleanup_retention(
                    config.completed_job_retention_hours,
                    config.completed_job_retention_max,
                    config.failed_job_retention_days,
                )
                .await
            {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "retention sweep removed old jobs");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(%e, "retention sweep failed"),
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}
