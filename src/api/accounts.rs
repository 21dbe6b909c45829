use std::sync::Arc;

use actix_web::{web, HttpResponse};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{WarmupError, WarmupResult};
use crate::models::{Account, CreateAccountRequest, UpdateAccountRequest};
use crate::services::domain_profiler::DomainProfiler;
use crate::services::encryption::EncryptionService;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/accounts")
            .route("", web::get().to(list_accounts))
            .route("", web::post().to(create_account))
            .route("/{id}", web::patch().to(update_account))
            .route("/{id}", web::delete().to(delete_account))
            .route("/{id}/check-domain", web::post().to(check_domain)),
    );
}

#[derive(serde::Deserialize)]
pub struct AccountFilter {
    #[serde(rename = "type")]
    pub role: Option<String>,
    pub status: Option<String>,
}

async fn list_accounts(pool: web::Data<PgPool>, filter: web::Query<AccountFilter>) -> WarmupResult<HttpResponse> {
    let accounts: Vec<Account> = sqlx::query_as(
        r#"
        SELECT * FROM accounts
        WHERE ($1::text IS NULL OR role = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(&filter.role)
    .bind(&filter.status)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(accounts))
}

async fn create_account(
    pool: web::Data<PgPool>,
    encryption: web::Data<Arc<EncryptionService>>,
    body: web::Json<CreateAccountRequest>,
) -> WarmupResult<HttpResponse> {
    let (password_encrypted, encryption_key_id) = encryption.encrypt(&body.password)?;

    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let account: Account = sqlx::query_as(
        r#"
        INSERT INTO accounts (
            id, email, role, first_name, last_name,
            smtp_host, smtp_port, smtp_use_tls, imap_host, imap_port, imap_use_ssl,
            password_encrypted, encryption_key_id, status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'active', $14)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&body.email)
    .bind(body.role)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(&body.smtp.host)
    .bind(body.smtp.port)
    .bind(body.smtp.use_tls)
    .bind(&body.imap.host)
    .bind(body.imap.port)
    .bind(body.imap.use_ssl)
    .bind(&password_encrypted)
    .bind(&encryption_key_id)
    .bind(now)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(account))
}

async fn update_account(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateAccountRequest>,
) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();

    let account: Option<Account> = sqlx::query_as(
        r#"
        UPDATE accounts SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            status = COALESCE($4, status),
            daily_send_cap = COALESCE($5, daily_send_cap)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(body.status)
    .bind(body.daily_send_cap)
    .fetch_optional(pool.get_ref())
    .await?;

    match account {
        Some(account) => Ok(HttpResponse::Ok().json(account)),
        None => Err(WarmupError::NotFound(format!("account {id} not found"))),
    }
}

async fn delete_account(pool: web::Data<PgPool>, path: web::Path<Uuid>) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();
    let result = sqlx::query("DELETE FROM accounts WHERE id = $1").bind(id).execute(pool.get_ref()).await?;

    if result.rows_affected() == 0 {
        return Err(WarmupError::NotFound(format!("account {id} not found")));
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn check_domain(pool: web::Data<PgPool>, path: web::Path<Uuid>) -> WarmupResult<HttpResponse> {
    let id = path.into_inner();
    let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| WarmupError::NotFound(format!("account {id} not found")))?;

    let info = DomainProfiler::check_domain(&account.email).await;

    sqlx::query(
        "UPDATE accounts SET domain = $2, domain_age_days = $3, last_domain_check_at = $4 WHERE id = $1",
    )
    .bind(id)
    .bind(&info.domain)
    .bind(info.age_days.map(|d| d as i32))
    .bind(chrono::Utc::now())
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "domain": info.domain,
        "ageDays": info.age_days,
        "warmupWeeksRecommended": info.warmup_weeks_recommended(),
        "initialDailyLimit": info.initial_daily_limit(),
    })))
}
