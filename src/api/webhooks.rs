use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ServiceError;
use crate::services::event_ingestor::{EventIngestor, WebhookOutcome};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhooks").route("/ses", web::post().to(receive_ses_event)));
}

/// Provider webhook endpoint. Returns 200 for processed and ignored events,
/// 400 when a subscription confirmation has no SubscribeURL, 500 on handler
/// failure.
async fn receive_ses_event(
    ingestor: web::Data<EventIngestor>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    let message_type = req
        .headers()
        .get("x-amz-sns-message-type")
        .and_then(|v| v.to_str().ok());
    let body = String::from_utf8_lossy(&body);

    let outcome = ingestor.handle_webhook(message_type, &body).await?;
    let response = match outcome {
        WebhookOutcome::SubscriptionConfirmed => serde_json::json!({ "confirmed": true }),
        WebhookOutcome::Processed => serde_json::json!({ "processed": true }),
        WebhookOutcome::Ignored(reason) => {
            serde_json::json!({ "processed": false, "reason": reason })
        }
    };
    Ok(HttpResponse::Ok().json(response))
}
