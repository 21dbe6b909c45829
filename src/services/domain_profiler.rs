use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WHOIS_PORT: u16 = 43;
const WHOIS_TIMEOUT: Duration = Duration::from_secs(8);

/// Domain reputation signal used to size a campaign's warmup curve
/// (spec §4.4 / C3). Age brackets and schedule table are carried over
/// from the age-bracket heuristics of the reference implementation.
#[derive(Debug, Clone)]
pub struct DomainInfo {
    pub domain: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub age_days: Option<i64>,
    pub registrar: Option<String>,
}

impl DomainInfo {
    pub fn unknown(domain: String) -> Self {
        Self {
            domain,
            creation_date: None,
            age_days: None,
            registrar: None,
        }
    }

    pub fn is_new_domain(&self) -> bool {
        self.age_days.map(|d| d < 30).unwrap_or(false)
    }

    pub fn warmup_weeks_recommended(&self) -> i32 {
        match self.age_days {
            None => 6,
            Some(d) if d < 30 => 8,
            Some(d) if d < 90 => 6,
            Some(d) if d < 180 => 4,
            Some(_) => 2,
        }
    }

    pub fn initial_daily_limit(&self) -> i32 {
        match self.age_days {
            None => 5,
            Some(d) if d < 30 => 3,
            Some(d) if d < 90 => 5,
            Some(d) if d < 180 => 10,
            Some(_) => 20,
        }
    }

    /// Full per-week daily-send-cap table for this domain's age bracket,
    /// truncated to `warmup_weeks_recommended()` entries.
    pub fn recommended_schedule(&self) -> BTreeMap<i32, i32> {
        let initial = self.initial_daily_limit();
        let weeks = self.warmup_weeks_recommended();

        let full: BTreeMap<i32, i32> = match self.age_days {
            Some(d) if d < 30 => [
                (1, initial),
                (2, initial + 2),
                (3, initial + 5),
                (4, initial + 10),
                (5, initial + 15),
                (6, initial + 20),
                (7, initial + 30),
                (8, initial + 40),
            ]
            .into_iter()
            .collect(),
            Some(d) if d < 90 => [(1, 5), (2, 10), (3, 15), (4, 25), (5, 35), (6, 50)]
                .into_iter()
                .collect(),
            Some(d) if d < 180 => [(1, 10), (2, 20), (3, 35), (4, 50)].into_iter().collect(),
            _ => [(1, 20), (2, 50)].into_iter().collect(),
        };

        full.into_iter().filter(|(week, _)| *week <= weeks).collect()
    }
}

/// Looks up domain age over a raw WHOIS (RFC 3912, port 43) connection —
/// no WHOIS crate exists anywhere in this workspace's dependency pack, so
/// this stays a thin client built on crates already in use elsewhere
/// (tokio, regex, chrono) rather than introducing a new one for a single
/// caller.
pub struct DomainProfiler;

impl DomainProfiler {
    pub fn extract_domain(email_or_domain: &str) -> String {
        match email_or_domain.rsplit_once('@') {
            Some((_, domain)) => domain.to_lowercase(),
            None => email_or_domain.to_lowercase(),
        }
    }

    pub async fn check_domain(email_or_domain: &str) -> DomainInfo {
        let domain = Self::extract_domain(email_or_domain);

        match Self::whois_lookup(&domain).await {
            Ok(raw) => Self::parse_whois(&domain, &raw),
            Err(e) => {
                tracing::warn!(%domain, error = %e, "WHOIS lookup failed, falling back to unknown age");
                DomainInfo::unknown(domain)
            }
        }
    }

    async fn whois_lookup(domain: &str) -> Result<String, std::io::Error> {
        let server = whois_server_for(domain);
        let addr = format!("{server}:{WHOIS_PORT}");

        timeout(WHOIS_TIMEOUT, async {
            let mut stream = TcpStream::connect(&addr).await?;
            stream.write_all(format!("{domain}\r\n").as_bytes()).await?;
            stream.flush().await?;

            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        })
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "WHOIS query timed out"))?
    }

    fn parse_whois(domain: &str, raw: &str) -> DomainInfo {
        let creation_date = extract_creation_date(raw);
        let age_days = creation_date.map(|created| (Utc::now() - created).num_days());
        let registrar = extract_field(raw, &["Registrar:", "registrar:"]);

        DomainInfo {
            domain: domain.to_string(),
            creation_date,
            age_days,
            registrar,
        }
    }
}

/// IANA delegates most gTLD WHOIS to these well-known registry servers;
/// unrecognized TLDs fall back to IANA's own root server, which at least
/// returns a referral.
fn whois_server_for(domain: &str) -> &'static str {
    let tld = domain.rsplit('.').next().unwrap_or("");
    match tld {
        "com" | "net" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "io" => "whois.nic.io",
        "co" => "whois.nic.co",
        "dev" | "app" => "whois.nic.google",
        "it" => "whois.nic.it",
        _ => "whois.iana.org",
    }
}

fn extract_field(raw: &str, labels: &[&str]) -> Option<String> {
    for line in raw.lines() {
        for label in labels {
            if let Some(rest) = line.strip_prefix(label) {
                let value = rest.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn extract_creation_date(raw: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(
        r"(?i)(?:Creation Date|Registered on|created):\s*([0-9]{4}-[0-9]{2}-[0-9]{2}(?:T[0-9:]+Z?)?)",
    )
    .expect("static regex is valid");

    let captured = re.captures(raw)?.get(1)?.as_str();
    if let Ok(dt) = DateTime::parse_from_rfc3339(captured) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(captured, "%Y-%m-%d")
        .ok()
        .map(|d| DateTime::from_naive_utc_and_offset(d.and_hms_opt(0, 0, 0).unwrap(), Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_domain_from_email() {
        assert_eq!(DomainProfiler::extract_domain("a@Example.COM"), "example.com");
        assert_eq!(DomainProfiler::extract_domain("example.org"), "example.org");
    }

    #[test]
    fn new_domain_is_conservative() {
        let info = DomainInfo {
            domain: "new.com".into(),
            creation_date: Some(Utc::now()),
            age_days: Some(10),
            registrar: None,
        };
        assert!(info.is_new_domain());
        assert_eq!(info.warmup_weeks_recommended(), 8);
        assert_eq!(info.initial_daily_limit(), 3);
        assert_eq!(info.recommended_schedule().len(), 8);
    }

    #[test]
    fn established_domain_warms_fast() {
        let info = DomainInfo {
            domain: "old.com".into(),
            creation_date: Some(Utc::now()),
            age_days: Some(1000),
            registrar: None,
        };
        assert_eq!(info.warmup_weeks_recommended(), 2);
        assert_eq!(info.recommended_schedule().len(), 2);
    }

    #[test]
    fn unknown_age_defaults_to_six_weeks() {
        let info = DomainInfo::unknown("mystery.com".into());
        assert_eq!(info.warmup_weeks_recommended(), 6);
        assert_eq!(info.initial_daily_limit(), 5);
    }

    #[test]
    fn parses_iso_creation_date() {
        let raw = "Domain Name: EXAMPLE.COM\nCreation Date: 2010-05-12T04:00:00Z\nRegistrar: Example Registrar\n";
        let info = DomainProfiler::parse_whois("example.com", raw);
        assert!(info.age_days.unwrap() > 0);
        assert_eq!(info.registrar.as_deref(), Some("Example Registrar"));
    }
}
