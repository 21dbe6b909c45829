pub mod ai_generator;
pub mod bounce_detector;
pub mod conversation_engine;
pub mod domain_profiler;
pub mod encryption;
pub mod metrics_aggregator;
pub mod rate_limit_ledger;
pub mod tracking_tokens;
pub mod transport;
pub mod warmup_scheduler;
