use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{WarmupError, WarmupResult};
use crate::models::{Account, Campaign, CampaignStatus, Language};
use crate::services::ai_generator::AiGenerator;
use crate::services::domain_profiler::DomainProfiler;
use crate::services::encryption::EncryptionService;
use crate::services::transport::{MailTransport, OutboundMessage, SmtpCredentials};
use crate::services::tracking_tokens::TrackingTokenService;

const BUSINESS_HOUR_START: u32 = 9;
const BUSINESS_HOUR_END: u32 = 18;

/// Per-call cap on how many emails a single `process_campaign` invocation
/// sends, so volume trickles out across the polling loop instead of firing
/// in one burst (spec §4.1 "Batch emission").
const MAX_BATCH_PER_CALL: i32 = 3;

/// Drives progressive volume increase across active campaigns (spec §4.1 /
/// C7). Grounded on the teacher's `campaign_scheduler.rs` for the
/// iterate-active-campaigns / persist-then-send shape, and the reference
/// implementation's week-based target table and per-sender slotting.
pub struct WarmupScheduler {
    pool: PgPool,
    encryption: Arc<EncryptionService>,
    ai_generator: Arc<AiGenerator>,
    tracking: Arc<TrackingTokenService>,
    api_base_url: String,
    default_duration_weeks: i32,
    max_emails_per_day: i32,
    max_bounce_rate: f64,
    auto_pause_on_high_bounce: bool,
    slot_delay_min_secs: u64,
    slot_delay_max_secs: u64,
}

impl WarmupScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        encryption: Arc<EncryptionService>,
        ai_generator: Arc<AiGenerator>,
        tracking: Arc<TrackingTokenService>,
        api_base_url: String,
        default_duration_weeks: i32,
        max_emails_per_day: i32,
        max_bounce_rate: f64,
        auto_pause_on_high_bounce: bool,
        slot_delay_min_secs: u64,
        slot_delay_max_secs: u64,
    ) -> Self {
        Self {
            pool,
            encryption,
            ai_generator,
            tracking,
            api_base_url,
            default_duration_weeks,
            max_emails_per_day,
            max_bounce_rate,
            auto_pause_on_high_bounce,
            slot_delay_min_secs,
            slot_delay_max_secs,
        }
    }

    pub async fn start_campaign(
        &self,
        name: &str,
        sender_ids: &[Uuid],
        receiver_ids: &[Uuid],
        duration_weeks: Option<i32>,
        language: Language,
    ) -> WarmupResult<Campaign> {
        if sender_ids.is_empty() || receiver_ids.is_empty() {
            return Err(WarmupError::InvalidInput(
                "a campaign needs at least one sender and one receiver".into(),
            ));
        }

        let senders: Vec<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = ANY($1)")
            .bind(sender_ids)
            .fetch_all(&self.pool)
            .await?;
        if senders.len() != sender_ids.len() {
            return Err(WarmupError::NotFound("some sender accounts were not found".into()));
        }

        let receiver_count: i64 = sqlx::query_scalar("SELECT count(*) FROM accounts WHERE id = ANY($1)")
            .bind(receiver_ids)
            .fetch_one(&self.pool)
            .await?;
        if receiver_count as usize != receiver_ids.len() {
            return Err(WarmupError::NotFound("some receiver accounts were not found".into()));
        }

        let duration = match duration_weeks {
            Some(w) => w,
            None => self.calculate_optimal_duration(&senders).await?,
        };

        let campaign_id = Uuid::new_v4();
        let now = Utc::now();
        let first_send = self.next_send_time(now, false);

        sqlx::query(
            r#"
            INSERT INTO campaigns (id, name, start_time, duration_weeks, current_week, status, language, next_send_time, created_at)
            VALUES ($1, $2, $3, $4, 1, 'active', $5, $6, $7)
            "#,
        )
        .bind(campaign_id)
        .bind(name)
        .bind(now)
        .bind(duration)
        .bind(language)
        .bind(first_send)
        .bind(now)
        .execute(&self.pool)
        .await?;

        for sender_id in sender_ids {
            sqlx::query("INSERT INTO campaign_senders (campaign_id, account_id) VALUES ($1, $2)")
                .bind(campaign_id)
                .bind(sender_id)
                .execute(&self.pool)
                .await?;
        }
        for receiver_id in receiver_ids {
            sqlx::query("INSERT INTO campaign_receivers (campaign_id, account_id) VALUES ($1, $2)")
                .bind(campaign_id)
                .bind(receiver_id)
                .execute(&self.pool)
                .await?;
        }

        sqlx::query("UPDATE accounts SET warmup_start_at = COALESCE(warmup_start_at, $2) WHERE id = ANY($1)")
            .bind(sender_ids)
            .bind(now)
            .execute(&self.pool)
            .await?;

        tracing::info!(%campaign_id, name, senders = senders.len(), receivers = receiver_ids.len(), duration, "started warmup campaign");

        sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
            .map_err(WarmupError::from)
    }

    async fn calculate_optimal_duration(&self, senders: &[Account]) -> WarmupResult<i32> {
        let mut max_duration = self.default_duration_weeks;

        for sender in senders {
            if sender.domain_age_days.is_none() {
                let info = DomainProfiler::check_domain(&sender.email).await;
                sqlx::query(
                    "UPDATE accounts SET domain = $2, domain_age_days = $3, last_domain_check_at = $4 WHERE id = $1",
                )
                .bind(sender.id)
                .bind(&info.domain)
                .bind(info.age_days.map(|d| d as i32))
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

                max_duration = max_duration.max(info.warmup_weeks_recommended());
            }
        }

        Ok(max_duration)
    }

    pub async fn process_all_campaigns(&self) -> WarmupResult<i64> {
        let campaigns: Vec<Campaign> = sqlx::query_as("SELECT * FROM campaigns WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await?;

        tracing::info!(count = campaigns.len(), "processing active campaigns");

        let mut total_sent = 0i64;
        for campaign in campaigns {
            match self.process_campaign(&campaign, false).await {
                Ok(sent) => total_sent += sent as i64,
                Err(e) => tracing::error!(campaign_id = %campaign.id, error = %e, "failed to process campaign"),
            }
        }
        Ok(total_sent)
    }

    /// Processes one polling tick for a campaign (spec §4.1). `force` bypasses
    /// the `next_send_time` schedule gate, for manual/API-triggered runs.
    pub async fn process_campaign(&self, campaign: &Campaign, force: bool) -> WarmupResult<i32> {
        if campaign.status != CampaignStatus::Active {
            return Ok(0);
        }

        let now = Utc::now();
        if !force {
            if let Some(next) = campaign.next_send_time {
                if next > now {
                    return Ok(0);
                }
            }
        }

        let weeks_elapsed = (now - campaign.start_time).num_days() / 7 + 1;
        let current_week = (weeks_elapsed as i32).min(campaign.duration_weeks).max(1);

        if current_week > campaign.duration_weeks {
            sqlx::query("UPDATE campaigns SET status = 'completed', end_time = $2 WHERE id = $1")
                .bind(campaign.id)
                .bind(now)
                .execute(&self.pool)
                .await?;
            tracing::info!(campaign_id = %campaign.id, "campaign completed");
            return Ok(0);
        }

        let sender_ids: Vec<Uuid> = sqlx::query_scalar("SELECT account_id FROM campaign_senders WHERE campaign_id = $1")
            .bind(campaign.id)
            .fetch_all(&self.pool)
            .await?;
        let senders: Vec<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = ANY($1)")
            .bind(&sender_ids)
            .fetch_all(&self.pool)
            .await?;

        let target_today = self.calculate_daily_target(current_week, &senders);

        sqlx::query("UPDATE campaigns SET current_week = $2, target_emails_today = $3 WHERE id = $1")
            .bind(campaign.id)
            .bind(current_week)
            .bind(target_today)
            .execute(&self.pool)
            .await?;

        if campaign.emails_sent_today >= target_today {
            let next = self.next_send_time(now, true);
            sqlx::query("UPDATE campaigns SET next_send_time = $2 WHERE id = $1")
                .bind(campaign.id)
                .bind(next)
                .execute(&self.pool)
                .await?;
            return Ok(0);
        }

        let batch = MAX_BATCH_PER_CALL.min(target_today - campaign.emails_sent_today);
        let sent = self.send_warmup_batch(campaign, &senders, batch).await?;

        let target_met = campaign.emails_sent_today + sent >= target_today;
        let next = self.next_send_time(Utc::now(), target_met);

        sqlx::query(
            r#"
            UPDATE campaigns
            SET emails_sent_today = emails_sent_today + $2,
                total_sent = total_sent + $2,
                last_send_time = $3,
                next_send_time = $4
            WHERE id = $1
            "#,
        )
        .bind(campaign.id)
        .bind(sent)
        .bind(Utc::now())
        .bind(next)
        .execute(&self.pool)
        .await?;

        tracing::info!(campaign_id = %campaign.id, sent, target_today, "processed campaign batch");
        Ok(sent)
    }

    pub async fn reset_daily_counters(&self) -> WarmupResult<()> {
        sqlx::query("UPDATE campaigns SET emails_sent_today = 0 WHERE status = 'active'")
            .execute(&self.pool)
            .await?;
        tracing::info!("reset daily counters for active campaigns");
        Ok(())
    }

    /// Week-based base target scaled by sender count, capped per sender
    /// at the configured daily maximum (spec §4.1's progressive curve). In
    /// week 1 only, the base is additionally clamped by the youngest
    /// sender domain's recommended initial cap.
    fn calculate_daily_target(&self, week: i32, senders: &[Account]) -> i32 {
        let num_senders = senders.len() as i32;
        let mut base_target = match week {
            1 => 5,
            2 => 10,
            3 => 15,
            4 => 25,
            5 => 35,
            w if w >= 6 => 50,
            _ => 5,
        };

        if week == 1 {
            if let Some(youngest) = senders.iter().filter_map(|s| s.domain_age_days).min() {
                let clamp = if youngest < 30 {
                    3
                } else if youngest < 90 {
                    5
                } else if youngest < 180 {
                    10
                } else {
                    base_target
                };
                base_target = base_target.min(clamp);
            }
        }

        let total_target = base_target * num_senders.max(1);
        total_target.min(self.max_emails_per_day * num_senders.max(1))
    }

    /// Sends up to `count` emails for this batch, flattening every sender's
    /// slots into one list and shuffling it so no sender fires twice in a
    /// row, sleeping a random interval between slots (spec §4.1 "Batch
    /// emission").
    async fn send_warmup_batch(&self, campaign: &Campaign, senders: &[Account], count: i32) -> WarmupResult<i32> {
        if senders.is_empty() || count <= 0 {
            return Ok(0);
        }

        let receiver_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT account_id FROM campaign_receivers WHERE campaign_id = $1")
                .bind(campaign.id)
                .fetch_all(&self.pool)
                .await?;
        let receivers: Vec<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = ANY($1)")
            .bind(&receiver_ids)
            .fetch_all(&self.pool)
            .await?;

        if receivers.is_empty() {
            return Err(WarmupError::InvalidState("campaign has no sender or receiver accounts".into()));
        }

        let eligible: Vec<&Account> = {
            let mut eligible = Vec::new();
            for sender in senders {
                if sender.bounce_rate() > self.max_bounce_rate {
                    tracing::warn!(sender = %sender.email, rate = sender.bounce_rate(), "sender bounce rate too high, skipping");
                    if self.auto_pause_on_high_bounce {
                        sqlx::query("UPDATE accounts SET status = 'paused' WHERE id = $1")
                            .bind(sender.id)
                            .execute(&self.pool)
                            .await?;
                    }
                    continue;
                }
                eligible.push(sender);
            }
            eligible
        };

        if eligible.is_empty() {
            return Ok(0);
        }

        let emails_per_sender = count / eligible.len() as i32;
        let remainder = count % eligible.len() as i32;

        let mut rng = rand::thread_rng();
        let mut slots: Vec<&Account> = Vec::new();
        for (i, sender) in eligible.iter().enumerate() {
            let sender_count = emails_per_sender + if (i as i32) < remainder { 1 } else { 0 };
            for _ in 0..sender_count {
                slots.push(sender);
            }
        }
        slots.shuffle(&mut rng);

        let mut sent_count = 0;
        for (i, sender) in slots.iter().enumerate() {
            let receiver = receivers.choose(&mut rng).expect("receivers checked non-empty above");
            if self.send_one(campaign, sender, receiver).await.is_ok() {
                sent_count += 1;
            }

            if i + 1 < slots.len() {
                let delay = rng.gen_range(self.slot_delay_min_secs..=self.slot_delay_max_secs);
                tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
            }
        }

        Ok(sent_count)
    }

    async fn send_one(&self, campaign: &Campaign, sender: &Account, receiver: &Account) -> WarmupResult<()> {
        let content = self.ai_generator.generate_batch(1, sender.full_name().as_deref(), campaign.language).await;
        let content = content
            .into_iter()
            .next()
            .ok_or_else(|| WarmupError::InvalidState("AI generator returned no content".into()))?;

        let email_id = Uuid::new_v4();
        let tracking_url = self.tracking.generate_url(&self.api_base_url, email_id);

        let password = self.encryption.decrypt(&sender.password_encrypted)?;
        let creds = SmtpCredentials {
            host: sender.smtp_host.clone(),
            port: sender.smtp_port as u16,
            username: sender.email.clone(),
            password,
            use_tls: sender.smtp_use_tls,
        };

        let message = OutboundMessage {
            from: sender.email.clone(),
            from_name: sender.full_name(),
            to: receiver.email.clone(),
            subject: content.subject.clone(),
            body: content.body.clone(),
            in_reply_to: None,
            references: None,
            tracking_pixel_url: Some(tracking_url),
        };

        let message_id = MailTransport::send(&creds, &message).await?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO emails (
                id, message_id, sender_id, receiver_id, campaign_id, subject, body,
                status, sent_at, is_warmup, ai_generated, ai_prompt, ai_model, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'sent', $8, TRUE, TRUE, $9, $10, $8)
            "#,
        )
        .bind(email_id)
        .bind(&message_id)
        .bind(sender.id)
        .bind(receiver.id)
        .bind(campaign.id)
        .bind(&content.subject)
        .bind(&content.body)
        .bind(now)
        .bind(&content.prompt)
        .bind(&content.model)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE accounts SET total_sent = total_sent + 1 WHERE id = $1")
            .bind(sender.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Picks the next send instant (spec §4.1 "Send-time chooser", UTC
    /// business hours `[09:00, 18:00)`, no per-account timezone lookup). If
    /// today's target isn't met and we're still inside the window, picks a
    /// uniform instant between 30 minutes from now and the end of today's
    /// window; otherwise picks a uniform instant tomorrow.
    pub fn next_send_time(&self, from: DateTime<Utc>, target_met: bool) -> DateTime<Utc> {
        let mut rng = rand::thread_rng();
        let today_end = from.date_naive().and_hms_opt(BUSINESS_HOUR_END, 0, 0).unwrap().and_utc();
        let earliest_today = from + chrono::Duration::minutes(30);

        if !target_met && earliest_today < today_end {
            let window_secs = (today_end - earliest_today).num_seconds().max(0);
            let offset = rng.gen_range(0..=window_secs);
            return earliest_today + chrono::Duration::seconds(offset);
        }

        let tomorrow = from.date_naive().succ_opt().unwrap_or(from.date_naive());
        let window_start = tomorrow.and_hms_opt(BUSINESS_HOUR_START, 0, 0).unwrap().and_utc();
        let minute_offset = rng.gen_range(0..60 * (BUSINESS_HOUR_END - BUSINESS_HOUR_START));
        window_start + chrono::Duration::minutes(minute_offset as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_for_target_tests() -> WarmupScheduler {
        WarmupScheduler::new(
            PgPool::connect_lazy("postgres://localhost/test").unwrap(),
            Arc::new(EncryptionService::new_with_key(&[0u8; 32], "test").unwrap()),
            Arc::new(AiGenerator::new(&[], &[], None, Arc::new(crate::services::rate_limit_ledger::RateLimitLedger::new()))),
            Arc::new(TrackingTokenService::new(Some("test-secret".into()))),
            "http://localhost".into(),
            6,
            50,
            0.05,
            true,
            120,
            600,
        )
    }

    fn fake_sender(domain_age_days: Option<i32>) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "sender@example.com".into(),
            role: crate::models::AccountRole::Sender,
            first_name: None,
            last_name: None,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_use_tls: true,
            imap_host: "imap.example.com".into(),
            imap_port: 993,
            imap_use_ssl: true,
            password_encrypted: Vec::new(),
            encryption_key_id: "test".into(),
            domain: Some("example.com".into()),
            domain_age_days,
            last_domain_check_at: None,
            daily_send_cap: 50,
            warmup_start_at: None,
            total_sent: 0,
            total_received: 0,
            total_opened: 0,
            total_replied: 0,
            total_bounced: 0,
            status: crate::models::AccountStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn daily_target_scales_by_week_and_senders() {
        let scheduler = scheduler_for_target_tests();
        let senders = vec![fake_sender(None), fake_sender(None)];
        assert_eq!(scheduler.calculate_daily_target(1, &senders), 10);
        let one_sender = vec![fake_sender(None)];
        assert_eq!(scheduler.calculate_daily_target(6, &one_sender), 50);
    }

    #[test]
    fn daily_target_is_capped_by_config_max() {
        let scheduler = scheduler_for_target_tests();
        let senders = vec![fake_sender(None), fake_sender(None), fake_sender(None)];
        assert_eq!(scheduler.calculate_daily_target(6, &senders), 150);
    }

    #[test]
    fn week_one_target_clamped_by_youngest_domain() {
        let scheduler = scheduler_for_target_tests();
        let senders = vec![fake_sender(Some(15)), fake_sender(Some(200))];
        assert_eq!(scheduler.calculate_daily_target(1, &senders), 6);
    }

    #[test]
    fn week_one_target_unclamped_for_mature_domains() {
        let scheduler = scheduler_for_target_tests();
        let senders = vec![fake_sender(Some(200)), fake_sender(Some(365))];
        assert_eq!(scheduler.calculate_daily_target(1, &senders), 10);
    }

    #[test]
    fn send_time_today_lands_within_remaining_window() {
        let scheduler = scheduler_for_target_tests();
        let now = Utc::now().date_naive().and_hms_opt(10, 0, 0).unwrap().and_utc();
        let next = scheduler.next_send_time(now, false);
        assert_eq!(next.date_naive(), now.date_naive());
        assert!(next.hour() < BUSINESS_HOUR_END);
    }

    #[test]
    fn send_time_rolls_to_tomorrow_when_target_met() {
        let scheduler = scheduler_for_target_tests();
        let now = Utc::now().date_naive().and_hms_opt(10, 0, 0).unwrap().and_utc();
        let next = scheduler.next_send_time(now, true);
        assert!(next.date_naive() > now.date_naive());
        assert!(next.hour() >= BUSINESS_HOUR_START && next.hour() < BUSINESS_HOUR_END);
    }
}
