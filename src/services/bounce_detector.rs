use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WarmupResult;
use crate::models::{Account, Email, EmailStatus};
use crate::services::encryption::EncryptionService;
use crate::services::transport::{ImapCredentials, MailTransport};

const BOUNCE_SUBJECT_PATTERNS: &[&str] = &[
    r"(?i)delivery\s+status\s+notification",
    r"(?i)undelivered\s+mail",
    r"(?i)returned\s+mail",
    r"(?i)mail\s+delivery\s+(failed|failure)",
    r"(?i)undeliverable",
    r"(?i)mailer-daemon",
    r"(?i)delivery\s+failure",
    r"(?i)message\s+not\s+delivered",
];

const BOUNCE_SENDER_KEYWORDS: &[&str] = &["mailer-daemon", "postmaster", "noreply"];

/// Recognizes and links bounce notifications back to the original send
/// (spec §4.8 / C9). Grounded on the reference implementation's subject
/// pattern list and last-10-sent-emails recipient backlink heuristic.
pub struct BounceDetector {
    pool: PgPool,
    encryption: Arc<EncryptionService>,
}

impl BounceDetector {
    pub fn new(pool: PgPool, encryption: Arc<EncryptionService>) -> Self {
        Self { pool, encryption }
    }

    pub fn is_bounce_message(subject: &str, sender: &str) -> bool {
        let sender_lower = sender.to_lowercase();
        if BOUNCE_SENDER_KEYWORDS.iter().any(|k| sender_lower.contains(k)) {
            return true;
        }

        BOUNCE_SUBJECT_PATTERNS.iter().any(|pattern| {
            Regex::new(pattern).expect("static bounce pattern is valid").is_match(subject)
        })
    }

    pub async fn process_all_senders(&self) -> WarmupResult<HashMap<String, i32>> {
        let senders: Vec<Account> =
            sqlx::query_as("SELECT * FROM accounts WHERE role = 'sender' AND status IN ('active', 'paused')")
                .fetch_all(&self.pool)
                .await?;

        tracing::info!(count = senders.len(), "processing bounce detection for sender accounts");

        let mut results = HashMap::new();
        for sender in senders {
            match self.process_sender_bounces(&sender).await {
                Ok(count) => {
                    results.insert(sender.email.clone(), count);
                }
                Err(e) => tracing::error!(account = %sender.email, error = %e, "failed to check for bounces"),
            }
        }
        Ok(results)
    }

    pub async fn process_sender_bounces(&self, sender: &Account) -> WarmupResult<i32> {
        tracing::info!(account = %sender.email, "checking for bounce notifications");

        let password = self.encryption.decrypt(&sender.password_encrypted)?;
        let creds = ImapCredentials {
            host: sender.imap_host.clone(),
            port: sender.imap_port as u16,
            username: sender.email.clone(),
            password,
            use_ssl: sender.imap_use_ssl,
        };

        let messages = MailTransport::fetch_unseen(&creds).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let mut bounce_count = 0;
        let mut non_bounce_uids = Vec::new();

        for message in &messages {
            if !Self::is_bounce_message(&message.subject, &message.from) {
                non_bounce_uids.push(message.uid);
                continue;
            }

            tracing::warn!(subject = %message.subject, from = %message.from, "bounce detected");

            match self.find_bounced_email(sender, &message.body).await? {
                Some(original) => {
                    sqlx::query("UPDATE emails SET status = $2, bounced_at = $3 WHERE id = $1")
                        .bind(original.id)
                        .bind(EmailStatus::Bounced)
                        .bind(Utc::now())
                        .execute(&self.pool)
                        .await?;

                    sqlx::query("UPDATE accounts SET total_bounced = total_bounced + 1 WHERE id = $1")
                        .bind(sender.id)
                        .execute(&self.pool)
                        .await?;

                    bounce_count += 1;
                    tracing::info!(email_id = %original.id, sender = %sender.email, "marked email as bounced");
                }
                None => {
                    tracing::warn!(from = %message.from, "could not find original email for bounce");
                }
            }
        }

        // All bounce notifications stay read; only non-bounce traffic the
        // caller didn't otherwise process is restored to unread.
        if !non_bounce_uids.is_empty() {
            MailTransport::mark_unseen(&creds, &non_bounce_uids).await?;
        }

        if bounce_count > 0 {
            tracing::info!(count = bounce_count, account = %sender.email, "processed bounces");
        }

        Ok(bounce_count)
    }

    async fn find_bounced_email(&self, sender: &Account, bounce_body: &str) -> WarmupResult<Option<Email>> {
        let email_pattern = Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
            .expect("static email pattern is valid");

        let candidates: Vec<String> = email_pattern
            .find_iter(bounce_body)
            .map(|m| m.as_str().to_lowercase())
            .collect();

        if candidates.is_empty() {
            return Ok(None);
        }

        let recent_emails: Vec<Email> = sqlx::query_as(
            "SELECT e.* FROM emails e WHERE e.sender_id = $1 AND e.status = 'sent' ORDER BY e.sent_at DESC LIMIT 10",
        )
        .bind(sender.id)
        .fetch_all(&self.pool)
        .await?;

        for recipient_email in &candidates {
            if recipient_email == &sender.email.to_lowercase() {
                continue;
            }

            for email in &recent_emails {
                let receiver: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
                    .bind(email.receiver_id)
                    .fetch_optional(&self.pool)
                    .await?;

                if let Some(receiver) = receiver {
                    if receiver.email.to_lowercase() == *recipient_email {
                        return Ok(Some(email.clone()));
                    }
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bounce_by_sender_keyword() {
        assert!(BounceDetector::is_bounce_message("Re: hello", "Mailer-Daemon@example.com"));
        assert!(BounceDetector::is_bounce_message("Re: hello", "postmaster@example.com"));
    }

    #[test]
    fn detects_bounce_by_subject_pattern() {
        assert!(BounceDetector::is_bounce_message("Undelivered Mail Returned to Sender", "support@example.com"));
        assert!(BounceDetector::is_bounce_message("Delivery Status Notification (Failure)", "support@example.com"));
    }

    #[test]
    fn normal_reply_is_not_a_bounce() {
        assert!(!BounceDetector::is_bounce_message("Re: quick thought on travel", "jane@example.com"));
    }

    #[test]
    fn extracts_candidate_recipients_from_body() {
        let found = Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
            .unwrap()
            .find_iter("Final-Recipient: rfc822; jane@example.com")
            .map(|m| m.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(found, vec!["jane@example.com"]);
    }
}
