use std::sync::Arc;

use actix_web::{web, HttpResponse};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{WarmupError, WarmupResult};
use crate::models::{Account, Campaign, CampaignStatus, CreateCampaignRequest, Language};
use crate::services::warmup_scheduler::WarmupScheduler;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/campaigns")
            .route("", web::get().to(list_campaigns))
            .route("", web::post().to(create_campaign))
            .route("/{id}/status", web::patch().to(update_status))
            .route("/{id}/process", web::post().to(process_campaign))
            .route("/{id}", web::delete().to(delete_campaign))
            .route("/{id}/sender-stats", web::get().to(sender_stats))
            .route("/{id}/receiver-stats", web::get().to(receiver_stats)),
    );
}

#[derive(serde::Deserialize)]
pub struct CampaignFilter {
    pub status: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CampaignStatus,
}

/// Recomputes each campaign's lifetime counters from `emails` before they're
/// read back (spec §6's "counters resynced" contract for the list endpoint).
async fn resync_campaign_counters(pool: &PgPool) -> WarmupResult<()> {
    sqlx::query(
        r#"
        UPDATE campaigns c SET
            total_sent = COALESCE(s.sent, 0),
            total_opened = COALESCE(s.opened, 0),
            total_replied = COALESCE(s.replied, 0),
            total_bounced = COALESCE(s.bounced, 0)
        FROM (
            SELECT
                campaign_id,
                COUNT(*) FILTER (WHERE status != 'failed') AS sent,
                COUNT(*) FILTER (WHERE opened_at IS NOT NULL) AS opened,
                COUNT(*) FILTER (WHERE replied_at IS NOT NULL) AS replied,
                COUNT(*) FILTER (WHERE status = 'bounced') AS bounced
            FROM emails
            WHERE campaign_id IS NOT NULL
            GROUP BY campaign_id
        ) s
        WHERE c.id = s.campaign_id
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn list_campaigns(pool: web::Data<PgPool>, filter: web::Query<CampaignFilter>) -> WarmupResult<HttpResponse> {
    resync_campaign_counters(pool.get_ref()).await?;

    let campaigns: Vec<Campaign> = sqlx::query_as(
        "SELECT * FROM campaigns WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC",
    )
    .bind(&filter.status)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(campaigns))
}

async fn create_campaign(
    scheduler: web::Data<Arc<WarmupScheduler>>,
    body: web::Json<CreateCampaignRequest>,
) -> WarmupResult<HttpResponse> {
    if body.sender_ids.is_empty() || body.receiver_ids.is_empty() {
        return Err(WarmupError::InvalidInput(
            "senderIds and receiverIds must both be non-empty".into(),
        ));
    }

    let campaign = scheduler
        .start_campaign(
            &body.name,
            &body.sender_ids,
            &body.receiver_ids,
            body.duration_weeks,
            body.language.unwrap_or(Language::En),
        )
        .await?;

    Ok(HttpResponse::Created().json(campaign))
}

async fn update_status(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateStatusRequest>,
) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();
    let campaign: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| WarmupError::NotFound(format!("campaign {id} not found")))?;

    let allowed = match body.status {
        CampaignStatus::Active => campaign.can_start() || campaign.can_resume(),
        CampaignStatus::Paused => campaign.can_pause(),
        _ => false,
    };

    if campaign.status.is_terminal() || !allowed {
        return Err(WarmupError::InvalidState(format!(
            "cannot transition campaign from {} to {}",
            campaign.status, body.status
        )));
    }

    let updated: Campaign = sqlx::query_as("UPDATE campaigns SET status = $2 WHERE id = $1 RETURNING *")
        .bind(id)
        .bind(body.status)
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(updated))
}

async fn process_campaign(
    pool: web::Data<PgPool>,
    scheduler: web::Data<Arc<WarmupScheduler>>,
    path: web::Path<Uuid>,
) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();
    let campaign: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| WarmupError::NotFound(format!("campaign {id} not found")))?;

    let sent = scheduler.process_campaign(&campaign, true).await?;

    let refreshed: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
        .bind(id)
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "emailsSent": sent,
        "emailsSentToday": refreshed.emails_sent_today,
        "targetEmailsToday": refreshed.target_emails_today,
    })))
}

async fn delete_campaign(pool: web::Data<PgPool>, path: web::Path<Uuid>) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();
    let result = sqlx::query("DELETE FROM campaigns WHERE id = $1").bind(id).execute(pool.get_ref()).await?;

    if result.rows_affected() == 0 {
        return Err(WarmupError::NotFound(format!("campaign {id} not found")));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(serde::Serialize)]
struct AccountStat {
    account_id: Uuid,
    email: String,
    sent: i64,
    opened: i64,
    replied: i64,
    bounced: i64,
    open_rate: f64,
    reply_rate: f64,
    bounce_rate: f64,
}

async fn sender_stats(pool: web::Data<PgPool>, path: web::Path<Uuid>) -> WarmupResult<HttpResponse> {
    campaign_member_stats(&pool, path.into_inner(), "campaign_senders", "sender_id").await
}

async fn receiver_stats(pool: web::Data<PgPool>, path: web::Path<Uuid>) -> WarmupResult<HttpResponse> {
    campaign_member_stats(&pool, path.into_inner(), "campaign_receivers", "receiver_id").await
}

async fn campaign_member_stats(
    pool: &PgPool,
    campaign_id: Uuid,
    join_table: &str,
    email_column: &str,
) -> WarmupResult<HttpResponse> {
    let query = format!(
        r#"
        SELECT a.* FROM accounts a
        JOIN {join_table} m ON m.account_id = a.id
        WHERE m.campaign_id = $1
        "#
    );
    let members: Vec<Account> = sqlx::query_as(&query).bind(campaign_id).fetch_all(pool).await?;

    let mut stats = Vec::with_capacity(members.len());
    for member in members {
        let row: (i64, i64, i64, i64) = sqlx::query_as(&format!(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE e.status != 'failed'),
                COUNT(*) FILTER (WHERE e.opened_at IS NOT NULL),
                COUNT(*) FILTER (WHERE e.replied_at IS NOT NULL),
                COUNT(*) FILTER (WHERE e.status = 'bounced')
            FROM emails e
            WHERE e.campaign_id = $1 AND e.{email_column} = $2
            "#
        ))
        .bind(campaign_id)
        .bind(member.id)
        .fetch_one(pool)
        .await?;

        let (sent, opened, replied, bounced) = row;
        stats.push(AccountStat {
            account_id: member.id,
            email: member.email,
            sent,
            opened,
            replied,
            bounced,
            open_rate: ratio(opened, sent),
            reply_rate: ratio(replied, sent),
            bounce_rate: ratio(bounced, sent),
        });
    }

    Ok(HttpResponse::Ok().json(stats))
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
