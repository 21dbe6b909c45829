use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Replied,
    Bounced,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Delivered => "delivered",
            EmailStatus::Opened => "opened",
            EmailStatus::Replied => "replied",
            EmailStatus::Bounced => "bounced",
            EmailStatus::Failed => "failed",
        }
    }

    /// `Bounced` is terminal; every other status may still advance
    /// (spec §3's monotonic chain: Pending → Sent → {Delivered,Opened,Replied,Bounced}).
    pub fn is_terminal(&self) -> bool {
        matches!(self, EmailStatus::Bounced)
    }
}

impl std::fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single message exchanged between two accounts as part of a warmup
/// run, or a reply generated by the conversation engine (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Email {
    pub id: Uuid,
    pub message_id: Option<String>,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub campaign_id: Option<Uuid>,

    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,

    pub status: EmailStatus,

    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,

    pub is_warmup: bool,
    pub ai_generated: bool,
    pub ai_prompt: Option<String>,
    pub ai_model: Option<String>,

    pub retry_count: i32,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Email {
    /// First-open-wins: the conversation engine and tracking pixel both
    /// probe this before writing `opened_at` (spec §3).
    pub fn already_opened(&self) -> bool {
        self.opened_at.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }
}
