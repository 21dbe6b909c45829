use actix_web::{web, HttpResponse};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WarmupResult;
use crate::models::{Account, DailyMetric};
use crate::services::metrics_aggregator::MetricsAggregator;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/metrics")
            .route("/system", web::get().to(system_metrics))
            .route("/daily", web::get().to(daily_metrics))
            .route("/accounts/{id}", web::get().to(account_metrics)),
    );
}

#[derive(serde::Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

#[derive(serde::Serialize)]
struct SystemMetrics {
    total_accounts: i64,
    active_accounts: i64,
    total_campaigns: i64,
    active_campaigns: i64,
    total_emails_sent: i64,
    total_emails_received: i64,
    emails_sent_today: i64,
    average_open_rate: f64,
    average_reply_rate: f64,
    average_bounce_rate: f64,
}

async fn system_metrics(pool: web::Data<PgPool>) -> WarmupResult<HttpResponse> {
    let (total_accounts, active_accounts): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'active') FROM accounts",
    )
    .fetch_one(pool.get_ref())
    .await?;

    let (total_campaigns, active_campaigns): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'active') FROM campaigns",
    )
    .fetch_one(pool.get_ref())
    .await?;

    let (total_sent, total_received): (Option<i64>, Option<i64>) =
        sqlx::query_as("SELECT SUM(total_sent), SUM(total_received) FROM accounts")
            .fetch_one(pool.get_ref())
            .await?;

    let emails_sent_today: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(emails_sent_today), 0) FROM campaigns WHERE status = 'active'")
            .fetch_one(pool.get_ref())
            .await?;

    let rates: (Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
        r#"
        SELECT
            AVG(CASE WHEN total_sent > 0 THEN total_opened::float8 / total_sent ELSE 0 END),
            AVG(CASE WHEN total_sent > 0 THEN total_replied::float8 / total_sent ELSE 0 END),
            AVG(CASE WHEN total_sent > 0 THEN total_bounced::float8 / total_sent ELSE 0 END)
        FROM accounts
        "#,
    )
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(SystemMetrics {
        total_accounts,
        active_accounts,
        total_campaigns,
        active_campaigns,
        total_emails_sent: total_sent.unwrap_or(0),
        total_emails_received: total_received.unwrap_or(0),
        emails_sent_today,
        average_open_rate: rates.0.unwrap_or(0.0),
        average_reply_rate: rates.1.unwrap_or(0.0),
        average_bounce_rate: rates.2.unwrap_or(0.0),
    }))
}

#[derive(serde::Serialize, sqlx::FromRow)]
struct DailyAggregate {
    date: chrono::NaiveDate,
    emails_sent: i64,
    emails_received: i64,
    emails_opened: i64,
    emails_replied: i64,
    emails_bounced: i64,
}

async fn daily_metrics(pool: web::Data<PgPool>, query: web::Query<DaysQuery>) -> WarmupResult<HttpResponse> {
    let rows: Vec<DailyAggregate> = sqlx::query_as(
        r#"
        SELECT
            date,
            SUM(emails_sent) AS emails_sent,
            SUM(emails_received) AS emails_received,
            SUM(emails_opened) AS emails_opened,
            SUM(emails_replied) AS emails_replied,
            SUM(emails_bounced) AS emails_bounced
        FROM metrics
        WHERE date >= (CURRENT_DATE - $1::int)
        GROUP BY date
        ORDER BY date ASC
        "#,
    )
    .bind(query.days as i32)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(rows))
}

#[derive(serde::Serialize)]
struct AccountMetricsResponse {
    account: Account,
    history: Vec<DailyMetric>,
}

async fn account_metrics(
    pool: web::Data<PgPool>,
    aggregator: web::Data<std::sync::Arc<MetricsAggregator>>,
    path: web::Path<Uuid>,
    query: web::Query<DaysQuery>,
) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();

    let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| crate::error::WarmupError::NotFound(format!("account {id} not found")))?;

    let history = aggregator.metrics_for_account(id, query.days).await?;

    Ok(HttpResponse::Ok().json(AccountMetricsResponse { account, history }))
}
