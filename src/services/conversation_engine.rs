use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WarmupResult;
use crate::models::{Account, Campaign, EmailStatus};
use crate::services::ai_generator::AiGenerator;
use crate::services::encryption::EncryptionService;
use crate::services::transport::{extract_address, ImapCredentials, MailTransport, OutboundMessage, SmtpCredentials};
use crate::services::tracking_tokens::TrackingTokenService;

/// Fraction of unread messages from a known warmup sender that get a reply;
/// the rest are left unread to look like a human skimmed and moved on
/// (mirrors the reference implementation's `_should_respond` coin flip).
const RESPONSE_PROBABILITY: f64 = 0.85;

/// Polls receiver inboxes and drafts human-sounding replies (spec §4.7 / C8).
/// Reply delay is logged, never slept on — the teacher's worker loop already
/// owns cadence, and actually sleeping here would block the whole poll.
pub struct ConversationEngine {
    pool: PgPool,
    encryption: Arc<EncryptionService>,
    ai_generator: Arc<AiGenerator>,
    tracking: Arc<TrackingTokenService>,
    api_base_url: String,
    response_delay_min_hours: f64,
    response_delay_max_hours: f64,
}

impl ConversationEngine {
    pub fn new(
        pool: PgPool,
        encryption: Arc<EncryptionService>,
        ai_generator: Arc<AiGenerator>,
        tracking: Arc<TrackingTokenService>,
        api_base_url: String,
        response_delay_min_hours: f64,
        response_delay_max_hours: f64,
    ) -> Self {
        Self {
            pool,
            encryption,
            ai_generator,
            tracking,
            api_base_url,
            response_delay_min_hours,
            response_delay_max_hours,
        }
    }

    pub async fn process_all_receivers(&self) -> WarmupResult<i64> {
        let receivers: Vec<Account> =
            sqlx::query_as("SELECT * FROM accounts WHERE role = 'receiver' AND status = 'active'")
                .fetch_all(&self.pool)
                .await?;

        tracing::info!(count = receivers.len(), "polling receiver inboxes");

        let mut total_replies = 0i64;
        for receiver in receivers {
            match self.process_receiver(&receiver).await {
                Ok(replies) => total_replies += replies as i64,
                Err(e) => tracing::error!(account = %receiver.email, error = %e, "failed to process inbox"),
            }
        }
        Ok(total_replies)
    }

    async fn process_receiver(&self, receiver: &Account) -> WarmupResult<i32> {
        let password = self.encryption.decrypt(&receiver.password_encrypted)?;
        let creds = ImapCredentials {
            host: receiver.imap_host.clone(),
            port: receiver.imap_port as u16,
            username: receiver.email.clone(),
            password,
            use_ssl: receiver.imap_use_ssl,
        };

        let messages = MailTransport::fetch_unseen(&creds).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        sqlx::query("UPDATE accounts SET total_received = total_received + $2 WHERE id = $1")
            .bind(receiver.id)
            .bind(messages.len() as i64)
            .execute(&self.pool)
            .await?;

        let mut skip_uids = Vec::new();
        let mut replies_sent = 0;

        for message in &messages {
            let from_address = extract_address(&message.from);

            let sender: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE email = $1 AND role = 'sender'")
                .bind(&from_address)
                .fetch_optional(&self.pool)
                .await?;

            let Some(sender) = sender else {
                // Not one of our warmup senders; leave untouched so a real
                // human inbox owner still sees it as unread.
                skip_uids.push(message.uid);
                continue;
            };

            if !self.should_respond() {
                skip_uids.push(message.uid);
                continue;
            }

            let campaign: Option<Campaign> = sqlx::query_as(
                r#"
                SELECT c.* FROM campaigns c
                JOIN campaign_senders cs ON cs.campaign_id = c.id
                WHERE cs.account_id = $1 AND c.status = 'active'
                ORDER BY c.created_at DESC
                LIMIT 1
                "#,
            )
            .bind(sender.id)
            .fetch_optional(&self.pool)
            .await?;
            let language = campaign.as_ref().map(|c| c.language).unwrap_or(crate::models::Language::En);

            let delay_hours = rand::thread_rng().gen_range(self.response_delay_min_hours..=self.response_delay_max_hours);
            tracing::info!(
                from = %from_address, to = %receiver.email, delay_hours,
                "would wait before replying (logged only, not enforced)"
            );

            match self.reply_to(receiver, &sender, message, language).await {
                Ok(()) => replies_sent += 1,
                Err(e) => {
                    tracing::error!(from = %from_address, error = %e, "failed to send reply");
                    skip_uids.push(message.uid);
                }
            }
        }

        if !skip_uids.is_empty() {
            MailTransport::mark_unseen(&creds, &skip_uids).await?;
        }

        Ok(replies_sent)
    }

    fn should_respond(&self) -> bool {
        rand::thread_rng().gen_bool(RESPONSE_PROBABILITY)
    }

    async fn reply_to(
        &self,
        receiver: &Account,
        sender: &Account,
        original: &crate::services::transport::InboundMessage,
        language: crate::models::Language,
    ) -> WarmupResult<()> {
        let content = self
            .ai_generator
            .generate_reply(&original.subject, &original.body, receiver.full_name().as_deref(), language)
            .await;

        let email_id = Uuid::new_v4();
        let tracking_url = self.tracking.generate_url(&self.api_base_url, email_id);

        let password = self.encryption.decrypt(&receiver.password_encrypted)?;
        let creds = SmtpCredentials {
            host: receiver.smtp_host.clone(),
            port: receiver.smtp_port as u16,
            username: receiver.email.clone(),
            password,
            use_tls: receiver.smtp_use_tls,
        };

        let message = OutboundMessage {
            from: receiver.email.clone(),
            from_name: receiver.full_name(),
            to: sender.email.clone(),
            subject: content.subject.clone(),
            body: content.body.clone(),
            in_reply_to: original.message_id.clone(),
            references: original.references.clone(),
            tracking_pixel_url: Some(tracking_url),
        };

        let message_id = MailTransport::send(&creds, &message).await?;
        let now = Utc::now();

        let thread_id = original.references.clone().or_else(|| original.message_id.clone());

        sqlx::query(
            r#"
            INSERT INTO emails (
                id, message_id, sender_id, receiver_id, subject, body,
                in_reply_to, thread_id, status, sent_at, is_warmup, ai_generated, ai_prompt, ai_model, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'sent', $9, TRUE, TRUE, $10, $11, $9)
            "#,
        )
        .bind(email_id)
        .bind(&message_id)
        .bind(receiver.id)
        .bind(sender.id)
        .bind(&content.subject)
        .bind(&content.body)
        .bind(&original.message_id)
        .bind(&thread_id)
        .bind(now)
        .bind(&content.prompt)
        .bind(&content.model)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE accounts SET total_replied = total_replied + 1 WHERE id = $1")
            .bind(receiver.id)
            .execute(&self.pool)
            .await?;

        if let Some(original_id) = &original.message_id {
            sqlx::query(
                "UPDATE emails SET status = $2, replied_at = $3 WHERE message_id = $1 AND status != 'bounced'",
            )
            .bind(original_id)
            .bind(EmailStatus::Replied)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}
