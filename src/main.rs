use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use dotenvy::dotenv;

use inboxwarm::config::Config;
use inboxwarm::db;
use inboxwarm::services::ai_generator::AiGenerator;
use inboxwarm::services::encryption::EncryptionService;
use inboxwarm::services::metrics_aggregator::MetricsAggregator;
use inboxwarm::services::rate_limit_ledger::RateLimitLedger;
use inboxwarm::services::tracking_tokens::TrackingTokenService;
use inboxwarm::services::warmup_scheduler::WarmupScheduler;
use inboxwarm::api;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cfg = Config::from_env();
    let pool = db::connect_and_migrate(&cfg.database_url).await;

    let encryption = Arc::new(EncryptionService::new().expect("failed to initialize credential vault"));
    let tracking = Arc::new(TrackingTokenService::new(cfg.tracking_secret_key.clone()));
    let rate_limit_ledger = Arc::new(RateLimitLedger::new());
    let ai_generator = Arc::new(AiGenerator::new(
        &cfg.openrouter_keys,
        &cfg.groq_keys,
        cfg.openai_key.as_deref(),
        rate_limit_ledger.clone(),
    ));
    let scheduler = Arc::new(WarmupScheduler::new(
        pool.clone(),
        encryption.clone(),
        ai_generator.clone(),
        tracking.clone(),
        cfg.api_base_url.clone(),
        cfg.warmup_duration_weeks,
        cfg.max_emails_per_day,
        cfg.max_bounce_rate,
        cfg.auto_pause_on_high_bounce,
        cfg.warmup_slot_delay_min_secs,
        cfg.warmup_slot_delay_max_secs,
    ));
    let metrics_aggregator = Arc::new(MetricsAggregator::new(pool.clone()));

    tracing::info!("inbox warmup API starting on http://0.0.0.0:8080");

    HttpServer::new(move || {
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let cors = Cors::default()
            .allowed_origin(&frontend_url)
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE, actix_web::http::header::ACCEPT])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(encryption.clone()))
            .app_data(web::Data::new(tracking.clone()))
            .app_data(web::Data::new(scheduler.clone()))
            .app_data(web::Data::new(metrics_aggregator.clone()))
            .wrap(cors)
            .wrap(actix_middleware::Logger::default())
            .service(
                web::scope("/api")
                    .configure(api::accounts::configure)
                    .configure(api::campaigns::configure)
                    .configure(api::metrics::configure)
                    .configure(api::tracking::configure)
                    .configure(api::webhooks::configure),
            )
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
