use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One account's activity for one calendar day (spec §3). Unique on
/// `(account_id, date)`; rates are derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyMetric {
    pub id: Uuid,
    pub account_id: Uuid,
    pub date: NaiveDate,

    pub emails_sent: i32,
    pub emails_received: i32,
    pub emails_opened: i32,
    pub emails_replied: i32,
    pub emails_bounced: i32,
    pub emails_failed: i32,

    pub created_at: DateTime<Utc>,
}

impl DailyMetric {
    pub fn open_rate(&self) -> f64 {
        ratio(self.emails_opened, self.emails_sent)
    }

    pub fn reply_rate(&self) -> f64 {
        ratio(self.emails_replied, self.emails_received)
    }

    pub fn bounce_rate(&self) -> f64 {
        ratio(self.emails_bounced, self.emails_sent)
    }
}

fn ratio(numerator: i32, denominator: i32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Overall health signal for an account, computed on demand by the
/// metrics aggregator (spec.md supplement grounded on the Python
/// reference's richer `update_metrics` output — not a stored column).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub account_id: Uuid,
    pub score: f64,
    pub bounce_rate: f64,
    pub open_rate: f64,
    pub reply_rate: f64,
}
