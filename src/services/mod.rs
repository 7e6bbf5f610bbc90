pub mod analytics;
pub mod campaign_store;
pub mod day_scheduler;
pub mod delivery_queue;
pub mod email_job;
pub mod event_bus;
pub mod event_ingestor;
pub mod mail_transport;
pub mod message_store;
pub mod object_store;
pub mod orchestrator;
pub mod plan_generator;
pub mod randomizer;
pub mod rate_limiter;
pub mod recipient_pool;
