use actix_cors::Cors;
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use mailramp::api;
use mailramp::config::Config;
use mailramp::services::analytics::AnalyticsAggregator;
use mailramp::services::campaign_store::CampaignStore;
use mailramp::services::delivery_queue::DeliveryQueue;
use mailramp::services::event_bus::EventBus;
use mailramp::services::event_ingestor::EventIngestor;
use mailramp::services::message_store::MessageStore;
use mailramp::services::object_store::S3ObjectStore;
use mailramp::services::orchestrator::Orchestrator;
use mailramp::services::recipient_pool::RecipientPool;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to create pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let pool = Arc::new(pool);

    // Composition root: every service is constructed and wired here, nothing
    // is reached through a global.
    let object_store = Arc::new(S3ObjectStore::new(config.lists_bucket.clone()).await);
    let campaigns = CampaignStore::new(pool.clone());
    let messages = MessageStore::new(pool.clone());
    let queue = DeliveryQueue::new(pool.clone());
    let bus = EventBus::default();
    let recipients = RecipientPool::new(object_store, messages.clone(), &config);
    let analytics = AnalyticsAggregator::new(pool.clone(), messages.clone(), queue.clone());
    let orchestrator = Orchestrator::new(campaigns.clone(), queue.clone(), recipients, bus.clone());
    let ingestor =
        EventIngestor::new(pool.clone(), campaigns, messages, analytics.clone(), bus.clone());

    let orchestrator_data = web::Data::new(orchestrator);
    let analytics_data = web::Data::new(analytics);
    let ingestor_data = web::Data::new(ingestor);

    let bind_addr = config.bind_addr.clone();
    let frontend_url = config.frontend_url.clone();
    tracing::info!(%bind_addr, "mailramp api starting");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_url)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "PATCH"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::ACCEPT,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(orchestrator_data.clone())
            .app_data(analytics_data.clone())
            .app_data(ingestor_data.clone())
            .wrap(cors)
            .wrap(actix_middleware::Logger::default())
            .service(
                web::scope("/api")
                    .configure(api::campaigns::configure)
                    .configure(api::webhooks::configure),
            )
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(bind_addr)?
    .run()
    .await
}
