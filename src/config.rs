use std::env;

/// Process-wide configuration loaded once at startup and passed into every
/// component by reference — no package-level mutable globals (see §9).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub encryption_key: Option<String>,
    pub tracking_secret_key: Option<String>,
    pub api_base_url: String,

    pub openrouter_keys: Vec<String>,
    pub groq_keys: Vec<String>,
    pub openai_key: Option<String>,
    pub default_ai_provider: Option<String>,

    pub min_emails_per_day: i32,
    pub max_emails_per_day: i32,
    pub warmup_duration_weeks: i32,

    pub response_delay_min_hours: f64,
    pub response_delay_max_hours: f64,

    pub max_bounce_rate: f64,
    pub auto_pause_on_high_bounce: bool,

    pub warmup_slot_delay_min_secs: u64,
    pub warmup_slot_delay_max_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            redis_url: env::var("REDIS_URL").ok(),
            encryption_key: env::var("ENCRYPTION_KEY").ok(),
            tracking_secret_key: env::var("TRACKING_SECRET_KEY").ok(),
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            openrouter_keys: Self::numbered_keys("OPENROUTER_API_KEY", 9),
            groq_keys: Self::numbered_keys("GROQ_API_KEY", 2),
            openai_key: env::var("OPENAI_API_KEY").ok(),
            default_ai_provider: env::var("AI_PROVIDER").ok(),

            min_emails_per_day: Self::env_i32("MIN_EMAILS_PER_DAY", 5),
            max_emails_per_day: Self::env_i32("MAX_EMAILS_PER_DAY", 50),
            warmup_duration_weeks: Self::env_i32("WARMUP_DURATION_WEEKS", 6),

            response_delay_min_hours: Self::env_f64("RESPONSE_DELAY_MIN_HOURS", 1.0),
            response_delay_max_hours: Self::env_f64("RESPONSE_DELAY_MAX_HOURS", 6.0),

            max_bounce_rate: Self::env_f64("MAX_BOUNCE_RATE", 0.05),
            auto_pause_on_high_bounce: env::var("AUTO_PAUSE_ON_HIGH_BOUNCE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),

            warmup_slot_delay_min_secs: Self::env_u64("WARMUP_SLOT_DELAY_MIN_SECS", 120),
            warmup_slot_delay_max_secs: Self::env_u64("WARMUP_SLOT_DELAY_MAX_SECS", 600),
        }
    }

    /// Collects `PREFIX`, `PREFIX_2`, .. `PREFIX_{max_index}`, filtering out
    /// unset or obviously-placeholder values.
    fn numbered_keys(prefix: &str, max_index: u32) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(v) = env::var(prefix) {
            if is_plausible_key(&v) {
                keys.push(v);
            }
        }
        for i in 2..=max_index {
            if let Ok(v) = env::var(format!("{prefix}_{i}")) {
                if is_plausible_key(&v) {
                    keys.push(v);
                }
            }
        }
        keys
    }

    fn env_i32(name: &str, default: i32) -> i32 {
        env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn env_f64(name: &str, default: f64) -> f64 {
        env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn env_u64(name: &str, default: u64) -> u64 {
        env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

/// Rejects empty credentials and obvious placeholders, per §4.2's key-ring
/// discovery rule.
fn is_plausible_key(value: &str) -> bool {
    if value.trim().is_empty() {
        return false;
    }
    let lower = value.to_lowercase();
    !["your_", "placeholder", "xxx"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::is_plausible_key;

    #[test]
    fn rejects_placeholders() {
        assert!(!is_plausible_key(""));
        assert!(!is_plausible_key("your_openrouter_key_here"));
        assert!(!is_plausible_key("sk-xxx-placeholder"));
        assert!(is_plausible_key("sk-or-v1-abcdef123456"));
    }
}
