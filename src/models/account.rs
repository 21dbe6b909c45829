use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AccountRole {
    Sender,
    Receiver,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Sender => "sender",
            AccountRole::Receiver => "receiver",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Paused,
    Disabled,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Paused => "paused",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Error => "error",
        }
    }
}

/// Identity of a mailbox participating in warming (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub role: AccountRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    pub smtp_host: String,
    pub smtp_port: i32,
    pub smtp_use_tls: bool,
    pub imap_host: String,
    pub imap_port: i32,
    pub imap_use_ssl: bool,
    /// Ciphertext only — see services::encryption.
    pub password_encrypted: Vec<u8>,
    pub encryption_key_id: String,

    pub domain: Option<String>,
    pub domain_age_days: Option<i32>,
    pub last_domain_check_at: Option<DateTime<Utc>>,
    pub daily_send_cap: i32,
    pub warmup_start_at: Option<DateTime<Utc>>,

    pub total_sent: i64,
    pub total_received: i64,
    pub total_opened: i64,
    pub total_replied: i64,
    pub total_bounced: i64,

    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        }
    }

    /// Rolling bounce rate used by the scheduler's per-sender skip check
    /// (spec §4.1). Zero when nothing has been sent yet.
    pub fn bounce_rate(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            self.total_bounced as f64 / self.total_sent as f64
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SmtpConfigInput {
    pub host: String,
    pub port: i32,
    pub use_tls: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImapConfigInput {
    pub host: String,
    pub port: i32,
    pub use_ssl: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    #[serde(rename = "type")]
    pub role: AccountRole,
    pub smtp: SmtpConfigInput,
    pub imap: ImapConfigInput,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: Option<AccountStatus>,
    pub daily_send_cap: Option<i32>,
}
