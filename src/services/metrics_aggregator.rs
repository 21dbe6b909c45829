use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WarmupResult;
use crate::models::{Account, DailyMetric, HealthScore};

/// Rolls up each account's activity for today into a `DailyMetric` row and
/// derives a `HealthScore` (spec §4.9 / C10). The roll-up counts `emails`
/// rows that actually happened today rather than copying lifetime counters,
/// the same way the campaign resync in `api/campaigns.rs` derives its totals.
#[derive(sqlx::FromRow)]
struct DailyEmailCounts {
    sent: i64,
    received: i64,
    opened: i64,
    replied: i64,
    bounced: i64,
}

pub struct MetricsAggregator {
    pool: PgPool,
}

impl MetricsAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn update_all_metrics(&self) -> WarmupResult<i64> {
        let accounts: Vec<Account> = sqlx::query_as("SELECT * FROM accounts").fetch_all(&self.pool).await?;
        let today = Utc::now().date_naive();

        for account in &accounts {
            self.upsert_metric(account, today).await?;
        }

        tracing::info!(count = accounts.len(), "updated daily metrics");
        Ok(accounts.len() as i64)
    }

    async fn upsert_metric(&self, account: &Account, today: chrono::NaiveDate) -> WarmupResult<()> {
        let counts: DailyEmailCounts = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE sender_id = $1 AND status != 'failed' AND created_at::date = $2) AS sent,
                COUNT(*) FILTER (WHERE receiver_id = $1 AND created_at::date = $2) AS received,
                COUNT(*) FILTER (WHERE sender_id = $1 AND opened_at::date = $2) AS opened,
                COUNT(*) FILTER (WHERE sender_id = $1 AND in_reply_to IS NOT NULL AND created_at::date = $2) AS replied,
                COUNT(*) FILTER (WHERE sender_id = $1 AND status = 'bounced' AND bounced_at::date = $2) AS bounced
            FROM emails
            WHERE sender_id = $1 OR receiver_id = $1
            "#,
        )
        .bind(account.id)
        .bind(today)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO metrics (
                id, account_id, date, emails_sent, emails_received, emails_opened,
                emails_replied, emails_bounced, emails_failed, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9)
            ON CONFLICT (account_id, date) DO UPDATE SET
                emails_sent = EXCLUDED.emails_sent,
                emails_received = EXCLUDED.emails_received,
                emails_opened = EXCLUDED.emails_opened,
                emails_replied = EXCLUDED.emails_replied,
                emails_bounced = EXCLUDED.emails_bounced
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account.id)
        .bind(today)
        .bind(counts.sent as i32)
        .bind(counts.received as i32)
        .bind(counts.opened as i32)
        .bind(counts.replied as i32)
        .bind(counts.bounced as i32)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn metrics_for_account(&self, account_id: Uuid, days: i64) -> WarmupResult<Vec<DailyMetric>> {
        sqlx::query_as(
            "SELECT * FROM metrics WHERE account_id = $1 AND date >= (CURRENT_DATE - $2::int) ORDER BY date ASC",
        )
        .bind(account_id)
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Weighted composite: bounce rate dominates (deliverability risk),
    /// open/reply rate reward genuine engagement. Clamped to `[0, 100]`.
    pub async fn health_score(&self, account_id: Uuid) -> WarmupResult<HealthScore> {
        let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;

        let bounce_rate = account.bounce_rate();
        let open_rate = ratio(account.total_opened, account.total_sent);
        let reply_rate = ratio(account.total_replied, account.total_sent);

        let score = (100.0 - bounce_rate * 400.0 + open_rate * 20.0 + reply_rate * 30.0).clamp(0.0, 100.0);

        Ok(HealthScore {
            account_id,
            score,
            bounce_rate,
            open_rate,
            reply_rate,
        })
    }
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_zero_with_no_denominator() {
        assert_eq!(ratio(5, 0), 0.0);
    }

    #[test]
    fn ratio_computes_fraction() {
        assert!((ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }
}
