use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Error kinds surfaced by the orchestration services.
///
/// `StaleJob`, `CampaignNotRunning` and `DuplicateEmail` are normal drop paths
/// for the delivery workers: they are counted, never surfaced to callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflicting state: {0}")]
    ConflictingState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient io error: {0}")]
    TransientIo(String),

    #[error("malformed provider event: {0}")]
    ProviderEventMalformed(String),

    #[error("duplicate email for (campaign, recipient, day)")]
    DuplicateEmail,

    #[error("stale job: {0}")]
    StaleJob(String),

    #[error("campaign is not running")]
    CampaignNotRunning,
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ServiceError::DuplicateEmail,
            _ => ServiceError::TransientIo(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::TransientIo(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::ProviderEventMalformed(e.to_string())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ConflictingState(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_) | ServiceError::ProviderEventMalformed(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}
