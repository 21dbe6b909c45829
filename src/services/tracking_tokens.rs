use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_EXPIRY_DAYS: i64 = 30;
const DEV_FALLBACK_SECRET: &str = "inboxwarm-dev-secret-change-in-production";

/// HMAC-SHA256 signed open-tracking tokens (spec §4.6 / C6). Mirrors the
/// `"{id}:{timestamp}"` signing scheme, truncated to 32 hex chars for
/// shorter URLs, constant-time compared on validation.
pub struct TrackingTokenService {
    secret: Option<String>,
}

impl TrackingTokenService {
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.trim().is_empty());
        if secret.is_none() {
            tracing::warn!("TRACKING_SECRET_KEY not set, open tracking is disabled");
        }
        Self { secret }
    }

    /// Whether a real secret was configured. When `false`, the pixel is
    /// still served but no open is recorded (spec §4.6).
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    fn sign(&self, email_id: Uuid, timestamp: i64) -> String {
        let message = format!("{email_id}:{timestamp}");
        let key = self.secret.as_deref().unwrap_or(DEV_FALLBACK_SECRET);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());
        let digest = mac.finalize().into_bytes();
        hex::encode(digest)[..32].to_string()
    }

    /// Generates `(token, timestamp)` for embedding in a tracking URL.
    pub fn generate(&self, email_id: Uuid) -> (String, i64) {
        let timestamp = chrono::Utc::now().timestamp();
        (self.sign(email_id, timestamp), timestamp)
    }

    pub fn generate_url(&self, base_url: &str, email_id: Uuid) -> String {
        let (token, timestamp) = self.generate(email_id);
        format!("{base_url}/track/open/{email_id}?token={token}&ts={timestamp}")
    }

    /// Validates expiry (within `TOKEN_EXPIRY_DAYS`, never future-dated) and
    /// HMAC signature using constant-time comparison.
    pub fn validate(&self, email_id: Uuid, token: &str, timestamp: i64) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let now = chrono::Utc::now().timestamp();
        let age_seconds = now - timestamp;

        if age_seconds > TOKEN_EXPIRY_DAYS * 86_400 {
            tracing::debug!(%email_id, age_days = age_seconds / 86_400, "tracking token expired");
            return false;
        }
        if age_seconds < 0 {
            tracing::warn!(%email_id, "tracking token has a future timestamp");
            return false;
        }

        let expected = self.sign(email_id, timestamp);
        constant_time_eq(token.as_bytes(), expected.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_valid() {
        let service = TrackingTokenService::new(Some("test-secret".into()));
        let id = Uuid::new_v4();
        let (token, ts) = service.generate(id);
        assert!(service.validate(id, &token, ts));
    }

    #[test]
    fn expired_token_rejected() {
        let service = TrackingTokenService::new(Some("test-secret".into()));
        let id = Uuid::new_v4();
        let old_ts = chrono::Utc::now().timestamp() - (31 * 86_400);
        let token = service.sign(id, old_ts);
        assert!(!service.validate(id, &token, old_ts));
    }

    #[test]
    fn tampered_token_rejected() {
        let service = TrackingTokenService::new(Some("test-secret".into()));
        let id = Uuid::new_v4();
        let (_, ts) = service.generate(id);
        assert!(!service.validate(id, "0000000000000000000000000000000", ts));
    }

    #[test]
    fn wrong_email_id_rejected() {
        let service = TrackingTokenService::new(Some("test-secret".into()));
        let (token, ts) = service.generate(Uuid::new_v4());
        assert!(!service.validate(Uuid::new_v4(), &token, ts));
    }

    #[test]
    fn disabled_when_no_secret_configured() {
        let service = TrackingTokenService::new(None);
        assert!(!service.is_enabled());
        let id = Uuid::new_v4();
        let (token, ts) = service.generate(id);
        assert!(!service.validate(id, &token, ts));
    }
}
