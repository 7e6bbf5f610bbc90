use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::campaign::{CreateCampaignRequest, SenderEmailRequest, UpdateSenderEmailRequest};
use crate::services::analytics::AnalyticsAggregator;
use crate::services::orchestrator::Orchestrator;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/campaigns")
            .route("", web::get().to(list_campaigns))
            .route("", web::post().to(create_campaign))
            .route("/{id}", web::get().to(get_campaign))
            .route("/{id}", web::delete().to(delete_campaign))
            .route("/{id}/start", web::post().to(start_campaign))
            .route("/{id}/pause", web::post().to(pause_campaign))
            .route("/{id}/resume", web::post().to(resume_campaign))
            .route("/{id}/transition-day", web::post().to(transition_day))
            .route("/{id}/stats", web::get().to(realtime_stats))
            .route("/{id}/analytics", web::get().to(daily_analytics))
            .route("/{id}/plan", web::get().to(campaign_plan))
            .route("/{id}/plan/today", web::get().to(todays_plan))
            .route("/{id}/plan/current", web::get().to(current_execution_plan))
            .route("/{id}/plan/regenerate", web::post().to(regenerate_plan))
            .route("/{id}/plan/simulate", web::post().to(simulate_plan))
            .route("/{id}/senders", web::post().to(add_sender))
            .route("/{id}/senders/{email}", web::put().to(update_sender))
            .route("/{id}/senders/{email}", web::delete().to(remove_sender)),
    );
}

async fn list_campaigns(
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.list_campaigns().await?))
}

async fn create_campaign(
    orchestrator: web::Data<Orchestrator>,
    body: web::Json<CreateCampaignRequest>,
) -> Result<HttpResponse, ServiceError> {
    let campaign = orchestrator.create_campaign(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(campaign))
}

async fn get_campaign(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.get_campaign(path.into_inner()).await?))
}

async fn delete_campaign(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    orchestrator.delete(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    started_by: Option<String>,
}

async fn start_campaign(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
    body: Option<web::Json<StartRequest>>,
) -> Result<HttpResponse, ServiceError> {
    let started_by = body.and_then(|b| b.into_inner().started_by);
    let campaign = orchestrator.start(path.into_inner(), started_by.as_deref()).await?;
    Ok(HttpResponse::Ok().json(campaign))
}

async fn pause_campaign(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.pause(path.into_inner()).await?))
}

async fn resume_campaign(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.resume(path.into_inner()).await?))
}

async fn transition_day(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let transitioned = orchestrator.transition_day(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "transitioned": transitioned })))
}

async fn realtime_stats(
    orchestrator: web::Data<Orchestrator>,
    analytics: web::Data<AnalyticsAggregator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let campaign = orchestrator.get_campaign(path.into_inner()).await?;
    let stats = analytics.realtime_stats(campaign.id, campaign.current_day).await?;
    Ok(HttpResponse::Ok().json(stats))
}

async fn daily_analytics(
    analytics: web::Data<AnalyticsAggregator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(analytics.list_for_campaign(path.into_inner()).await?))
}

async fn campaign_plan(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.get_campaign_plan(path.into_inner()).await?))
}

async fn todays_plan(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.get_todays_plan(path.into_inner()).await?))
}

async fn current_execution_plan(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.get_current_execution_plan(path.into_inner()).await?))
}

async fn regenerate_plan(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.regenerate_plan(path.into_inner()).await?))
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    day: Option<i32>,
}

async fn simulate_plan(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
    body: Option<web::Json<SimulateRequest>>,
) -> Result<HttpResponse, ServiceError> {
    let day = body.and_then(|b| b.into_inner().day);
    Ok(HttpResponse::Ok().json(orchestrator.simulate_daily_plan(path.into_inner(), day).await?))
}

async fn add_sender(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
    body: web::Json<SenderEmailRequest>,
) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(orchestrator.add_sender_email(path.into_inner(), body.into_inner()).await?))
}

async fn update_sender(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<(Uuid, String)>,
    body: web::Json<UpdateSenderEmailRequest>,
) -> Result<HttpResponse, ServiceError> {
    let (id, email) = path.into_inner();
    Ok(HttpResponse::Ok().json(orchestrator.update_sender_email(id, &email, body.into_inner()).await?))
}

async fn remove_sender(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<(Uuid, String)>,
) -> Result<HttpResponse, ServiceError> {
    let (id, email) = path.into_inner();
    Ok(HttpResponse::Ok().json(orchestrator.remove_sender_email(id, &email).await?))
}
