use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Language {
    En,
    It,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::It => "it",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again (spec §3).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A warmup run pairing a set of senders against a set of receivers
/// (spec §3). Sender/receiver membership lives in the `campaign_senders`
/// and `campaign_receivers` join tables, not inline here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_weeks: i32,
    pub current_week: i32,

    pub next_send_time: Option<DateTime<Utc>>,
    pub last_send_time: Option<DateTime<Utc>>,
    pub emails_sent_today: i32,
    pub target_emails_today: i32,

    pub language: Language,
    pub status: CampaignStatus,

    pub total_sent: i64,
    pub total_opened: i64,
    pub total_replied: i64,
    pub total_bounced: i64,

    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Fraction of today's target already dispatched; used by the
    /// scheduler to decide whether another batch is owed (spec §4.1).
    pub fn today_progress(&self) -> f64 {
        if self.target_emails_today == 0 {
            1.0
        } else {
            self.emails_sent_today as f64 / self.target_emails_today as f64
        }
    }

    pub fn bounce_rate(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            self.total_bounced as f64 / self.total_sent as f64
        }
    }

    pub fn can_start(&self) -> bool {
        matches!(self.status, CampaignStatus::Pending)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self.status, CampaignStatus::Active)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self.status, CampaignStatus::Paused)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub sender_ids: Vec<Uuid>,
    pub receiver_ids: Vec<Uuid>,
    pub duration_weeks: Option<i32>,
    pub language: Option<Language>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub status: Option<CampaignStatus>,
}
