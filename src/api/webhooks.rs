use actix_web::{web, HttpResponse};
use chrono::Utc;
use sqlx::PgPool;

use crate::error::WarmupResult;
use crate::models::EmailStatus;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhooks").route("/bounce", web::post().to(bounce_webhook)));
}

#[derive(serde::Deserialize)]
pub struct BounceWebhookRequest {
    pub message_id: String,
    #[serde(rename = "type")]
    pub bounce_type: String,
}

/// Provider-pushed bounce notification, an alternative path to the IMAP
/// polling `BounceDetector` runs for providers that support delivery
/// webhooks (spec §6).
async fn bounce_webhook(pool: web::Data<PgPool>, body: web::Json<BounceWebhookRequest>) -> WarmupResult<HttpResponse> {
    tracing::warn!(message_id = %body.message_id, bounce_type = %body.bounce_type, "bounce webhook received");

    let result = sqlx::query(
        "UPDATE emails SET status = $2, bounced_at = $3 WHERE message_id = $1 AND status != 'bounced'",
    )
    .bind(&body.message_id)
    .bind(EmailStatus::Bounced)
    .bind(Utc::now())
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::NotFound().finish());
    }

    sqlx::query(
        "UPDATE accounts SET total_bounced = total_bounced + 1 WHERE id = (SELECT sender_id FROM emails WHERE message_id = $1)",
    )
    .bind(&body.message_id)
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().finish())
}
