use actix_web::{web, HttpResponse};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WarmupResult;
use crate::services::tracking_tokens::TrackingTokenService;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/track/open/{id}", web::get().to(track_open));
}

#[derive(serde::Deserialize)]
pub struct TrackQuery {
    pub token: String,
    pub ts: i64,
}

/// Transparent 1x1 GIF, served unconditionally (spec §4.6). A missing or
/// invalid token is logged and ignored rather than surfaced — the pixel
/// must never look broken in the recipient's mail client.
const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00,
    0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x44, 0x01, 0x00, 0x3B,
];

async fn track_open(
    pool: web::Data<PgPool>,
    tracking: web::Data<std::sync::Arc<TrackingTokenService>>,
    path: web::Path<Uuid>,
    query: web::Query<TrackQuery>,
) -> WarmupResult<HttpResponse> {
    let email_id = path.into_inner();

    if !tracking.is_enabled() {
        tracing::debug!(%email_id, "tracking disabled, serving pixel without recording");
    } else if tracking.validate(email_id, &query.token, query.ts) {
        if let Err(e) = record_open(pool.get_ref(), email_id).await {
            tracing::error!(%email_id, error = %e, "failed to record open");
        }
    } else {
        tracing::debug!(%email_id, "tracking pixel hit with invalid or expired token");
    }

    Ok(HttpResponse::Ok()
        .content_type("image/gif")
        .insert_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
        .body(PIXEL_GIF))
}

/// First-open-wins: only the first hit advances `opened_at` and the
/// sender's `total_opened` (spec §8's testable property).
async fn record_open(pool: &PgPool, email_id: Uuid) -> WarmupResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE emails SET
            status = CASE WHEN status = 'sent' THEN 'opened' ELSE status END,
            opened_at = NOW()
        WHERE id = $1 AND opened_at IS NULL
        "#,
    )
    .bind(email_id)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        sqlx::query(
            "UPDATE accounts SET total_opened = total_opened + 1 WHERE id = (SELECT sender_id FROM emails WHERE id = $1)",
        )
        .bind(email_id)
        .execute(pool)
        .await?;
    }

    Ok(())
}
