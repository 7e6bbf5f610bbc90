use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub frontend_url: String,

    // Object storage
    pub lists_bucket: String,
    pub global_list_key: String,
    pub unsubscribe_list_key: String,

    // Delivery
    pub worker_concurrency: usize,
    pub send_rate_per_second: usize,
    pub completed_job_retention_hours: i64,
    pub completed_job_retention_max: i64,
    pub failed_job_retention_days: i64,

    // Mail transport: "api" (provider HTTP API) or "smtp"
    pub mail_transport: String,
    pub provider_api_url: Option<String>,
    pub provider_api_token: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,

    pub default_admin_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            lists_bucket: env::var("LISTS_BUCKET").unwrap_or_else(|_| "mailramp-lists".to_string()),
            global_list_key: env::var("GLOBAL_LIST_KEY")
                .unwrap_or_else(|_| "lists/global.csv".to_string()),
            unsubscribe_list_key: env::var("UNSUBSCRIBE_LIST_KEY")
                .unwrap_or_else(|_| "lists/unsubscribed.csv".to_string()),
            worker_concurrency: env_usize("WORKER_CONCURRENCY", 50),
            send_rate_per_second: env_usize("SEND_RATE_PER_SECOND", 14),
            completed_job_retention_hours: env_i64("COMPLETED_JOB_RETENTION_HOURS", 24),
            completed_job_retention_max: env_i64("COMPLETED_JOB_RETENTION_MAX", 1000),
            failed_job_retention_days: env_i64("FAILED_JOB_RETENTION_DAYS", 7),
            mail_transport: env::var("MAIL_TRANSPORT").unwrap_or_else(|_| "api".to_string()),
            provider_api_url: env::var("PROVIDER_API_URL").ok(),
            provider_api_token: env::var("PROVIDER_API_TOKEN").ok(),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()),
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            default_admin_email: env::var("DEFAULT_ADMIN_EMAIL").ok(),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
