use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Rolling usage window for a single API key (spec §4.3 / C4). Process-local:
/// the worker and API server each keep their own ledger rather than sharing
/// one across processes (see Open Questions in the design doc).
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub key_label: String,
    pub rpm_limit: u32,
    pub rpd_limit: u32,

    pub requests_this_minute: u32,
    pub requests_today: u32,

    minute_reset_at: f64,
    day_reset_at: f64,

    hourly_history: VecDeque<f64>,
    pub is_exhausted: bool,
}

const HOURLY_HISTORY_CAP: usize = 3600;

impl RateLimitInfo {
    fn new(key_label: String, rpm_limit: u32, rpd_limit: u32, now: f64) -> Self {
        Self {
            key_label,
            rpm_limit,
            rpd_limit,
            requests_this_minute: 0,
            requests_today: 0,
            minute_reset_at: now + 60.0,
            day_reset_at: now + 86_400.0,
            hourly_history: VecDeque::new(),
            is_exhausted: false,
        }
    }

    pub fn utilization_rpm(&self) -> f64 {
        if self.rpm_limit == 0 {
            0.0
        } else {
            self.requests_this_minute as f64 / self.rpm_limit as f64 * 100.0
        }
    }

    pub fn utilization_rpd(&self) -> f64 {
        if self.rpd_limit == 0 {
            0.0
        } else {
            self.requests_today as f64 / self.rpd_limit as f64 * 100.0
        }
    }

    pub fn remaining_rpm(&self) -> u32 {
        self.rpm_limit.saturating_sub(self.requests_this_minute)
    }

    pub fn remaining_rpd(&self) -> u32 {
        self.rpd_limit.saturating_sub(self.requests_today)
    }

    fn check_resets(&mut self, now: f64) {
        if now >= self.minute_reset_at {
            self.requests_this_minute = 0;
            self.minute_reset_at = now + 60.0;
            self.is_exhausted = false;
        }
        if now >= self.day_reset_at {
            self.requests_today = 0;
            self.day_reset_at = now + 86_400.0;
            self.is_exhausted = false;
        }
    }

    /// Requests recorded in the trailing hour, used for saturation forecasts.
    fn requests_last_hour(&self, now: f64) -> u32 {
        let hour_ago = now - 3_600.0;
        self.hourly_history.iter().filter(|&&t| t >= hour_ago).count() as u32
    }

    /// Hours until the daily budget runs out at the current hourly rate, or
    /// `None` when the current pace won't exhaust it within 24h.
    pub fn estimated_saturation_hours(&self, now: f64) -> Option<f64> {
        let rate = self.requests_last_hour(now) as f64;
        if rate == 0.0 {
            return None;
        }
        let remaining = self.remaining_rpd() as f64;
        if remaining == 0.0 {
            return Some(0.0);
        }
        let hours = remaining / rate;
        if hours > 24.0 {
            None
        } else {
            Some(hours)
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

/// Ledger of per-API-key usage, guarded by a single mutex (spec §5's
/// "process-local, not cross-process" resolution).
pub struct RateLimitLedger {
    keys: Mutex<HashMap<String, RateLimitInfo>>,
}

impl RateLimitLedger {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, key_label: &str, rpm_limit: u32, rpd_limit: u32) -> RateLimitInfo {
        let now = now_secs();
        let mut keys = self.keys.lock().await;
        let info = keys
            .entry(key_label.to_string())
            .or_insert_with(|| RateLimitInfo::new(key_label.to_string(), rpm_limit, rpd_limit, now));
        info.check_resets(now);
        info.clone()
    }

    /// Returns `(allowed, reason)` without recording a request — the read-only
    /// half of `CanUse`/`Record` (spec §4.3), used to decide whether a key is
    /// even worth attempting before paying for the remote call.
    pub async fn can_use(&self, key_label: &str, rpm_limit: u32, rpd_limit: u32) -> (bool, String) {
        let now = now_secs();
        let mut keys = self.keys.lock().await;
        let info = keys
            .entry(key_label.to_string())
            .or_insert_with(|| RateLimitInfo::new(key_label.to_string(), rpm_limit, rpd_limit, now));
        info.check_resets(now);

        if info.requests_this_minute >= info.rpm_limit {
            let wait = (info.minute_reset_at - now).max(0.0) as u64;
            return (false, format!("RPM limit reached. Wait {wait}s."));
        }
        if info.requests_today >= info.rpd_limit {
            let wait = ((info.day_reset_at - now).max(0.0) / 3_600.0) as u64;
            return (false, format!("Daily limit reached. Wait {wait}h."));
        }

        (true, String::new())
    }

    /// Returns `(allowed, reason)`; on `true` the request is recorded.
    pub async fn try_record(&self, key_label: &str, rpm_limit: u32, rpd_limit: u32) -> (bool, String) {
        let now = now_secs();
        let mut keys = self.keys.lock().await;
        let info = keys
            .entry(key_label.to_string())
            .or_insert_with(|| RateLimitInfo::new(key_label.to_string(), rpm_limit, rpd_limit, now));
        info.check_resets(now);

        if info.requests_this_minute >= info.rpm_limit {
            info.is_exhausted = true;
            let wait = (info.minute_reset_at - now).max(0.0) as u64;
            return (false, format!("RPM limit reached. Wait {wait}s."));
        }
        if info.requests_today >= info.rpd_limit {
            info.is_exhausted = true;
            let wait = ((info.day_reset_at - now).max(0.0) / 3_600.0) as u64;
            return (false, format!("Daily limit reached. Wait {wait}h."));
        }

        info.requests_this_minute += 1;
        info.requests_today += 1;
        info.is_exhausted = false;
        info.hourly_history.push_back(now);
        if info.hourly_history.len() > HOURLY_HISTORY_CAP {
            info.hourly_history.pop_front();
        }

        (true, String::new())
    }

    pub async fn status(&self, key_label: &str, rpm_limit: u32, rpd_limit: u32) -> RateLimitInfo {
        self.entry(key_label, rpm_limit, rpd_limit).await
    }

    pub async fn reset(&self, key_label: &str) {
        let mut keys = self.keys.lock().await;
        keys.remove(key_label);
    }
}

impl Default for RateLimitLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_until_rpm_exhausted() {
        let ledger = RateLimitLedger::new();
        for _ in 0..3 {
            let (allowed, _) = ledger.try_record("key-a", 3, 1000).await;
            assert!(allowed);
        }
        let (allowed, reason) = ledger.try_record("key-a", 3, 1000).await;
        assert!(!allowed);
        assert!(reason.contains("RPM"));
    }

    #[tokio::test]
    async fn tracks_keys_independently() {
        let ledger = RateLimitLedger::new();
        ledger.try_record("key-a", 1, 10).await;
        let (allowed, _) = ledger.try_record("key-b", 1, 10).await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn reset_clears_usage() {
        let ledger = RateLimitLedger::new();
        ledger.try_record("key-a", 1, 10).await;
        ledger.reset("key-a").await;
        let (allowed, _) = ledger.try_record("key-a", 1, 10).await;
        assert!(allowed);
    }
}
