use actix_web::{HttpResponse, ResponseError};

/// Error taxonomy surfaced by the core (spec §7). Transport/provider errors
/// are handled internally by their owning services and only ever escape as
/// per-slot/per-message status transitions, never as `WarmupError`.
#[derive(Debug, thiserror::Error)]
pub enum WarmupError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ResponseError for WarmupError {
    fn error_response(&self) -> HttpResponse {
        let body = serde_json::json!({ "error": self.to_string() });
        match self {
            WarmupError::InvalidInput(_) => HttpResponse::BadRequest().json(body),
            WarmupError::NotFound(_) => HttpResponse::NotFound().json(body),
            WarmupError::InvalidState(_) => HttpResponse::BadRequest().json(body),
            WarmupError::EncryptionUnavailable(_) => HttpResponse::InternalServerError().json(body),
            WarmupError::IntegrityViolation(_) => HttpResponse::Conflict().json(body),
            WarmupError::Database(_) => HttpResponse::InternalServerError().json(body),
        }
    }
}

pub type WarmupResult<T> = Result<T, WarmupError>;
