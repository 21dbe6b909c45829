use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use dotenvy::dotenv;
use tokio::time::sleep;

use inboxwarm::config::Config;
use inboxwarm::db;
use inboxwarm::services::ai_generator::AiGenerator;
use inboxwarm::services::bounce_detector::BounceDetector;
use inboxwarm::services::conversation_engine::ConversationEngine;
use inboxwarm::services::encryption::EncryptionService;
use inboxwarm::services::metrics_aggregator::MetricsAggregator;
use inboxwarm::services::rate_limit_ledger::RateLimitLedger;
use inboxwarm::services::tracking_tokens::TrackingTokenService;
use inboxwarm::services::warmup_scheduler::WarmupScheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    let scheduler = WarmupScheduler::new(
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
    );
    let conversation_engine = ConversationEngine::new(
        pool.clone(),
        encryption.clone(),
        ai_generator.clone(),
        tracking.clone(),
        cfg.api_base_url.clone(),
        cfg.response_delay_min_hours,
        cfg.response_delay_max_hours,
    );
    let bounce_detector = BounceDetector::new(pool.clone(), encryption.clone());
    let metrics_aggregator = MetricsAggregator::new(pool.clone());

    println!("inbox warmup worker started");
    println!("   - warmup scheduler (every ~2h)");
    println!("   - conversation engine (every ~30min)");
    println!("   - bounce detector (every ~30-60min)");
    println!("   - daily counter reset at UTC midnight");
    println!("   - end-of-day metrics roll-up");

    let mut iteration = 0u64;

    loop {
        iteration += 1;

        // Warmup scheduler: every 1440 iterations (5s tick ≈ 2h).
        if iteration % 1440 == 0 {
            match scheduler.process_all_campaigns().await {
                Ok(sent) => println!("[{iteration}] warmup scheduler sent {sent} emails"),
                Err(e) => eprintln!("warmup scheduler error: {e}"),
            }
        }

        // Conversation engine: every 360 iterations (5s tick ≈ 30min).
        if iteration % 360 == 0 {
            match conversation_engine.process_all_receivers().await {
                Ok(replies) => println!("[{iteration}] conversation engine sent {replies} replies"),
                Err(e) => eprintln!("conversation engine error: {e}"),
            }
        }

        // Bounce detector: every 540 iterations (5s tick ≈ 45min).
        if iteration % 540 == 0 {
            match bounce_detector.process_all_senders().await {
                Ok(results) => {
                    let total: i32 = results.values().sum();
                    println!("[{iteration}] bounce detector found {total} bounces across {} senders", results.len());
                }
                Err(e) => eprintln!("bounce detector error: {e}"),
            }
        }

        // Daily counter reset + metrics roll-up, checked every iteration,
        // gated on the UTC midnight window so it only actually fires once.
        if should_reset_daily_counters() {
            if let Err(e) = scheduler.reset_daily_counters().await {
                eprintln!("failed to reset daily counters: {e}");
            }
            if let Err(e) = metrics_aggregator.update_all_metrics().await {
                eprintln!("failed to roll up daily metrics: {e}");
            }
        }

        sleep(Duration::from_secs(5)).await;
    }
}

fn should_reset_daily_counters() -> bool {
    let now = Utc::now();
    now.time().hour() == 0 && now.time().minute() < 5
}
