use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// WHOIS-derived registration facts for one registrable domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainAgeInfo {
    pub age_days: Option<u32>,
    pub registrar: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DomainAgeInfo {
    fn unknown(error: String) -> Self {
        Self {
            age_days: None,
            registrar: None,
            created_at: None,
            error: Some(error),
        }
    }
}

lazy_static! {
    static ref RE_REGISTRAR: Regex = Regex::new(r"(?i)registrar[:\s]+([^\r\n]+)").unwrap();
    static ref RE_ISO_DATE: Regex = Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap();
}

pub struct DomainAgeChecker {
    timeout: Duration,
    use_mock: bool,
}

impl DomainAgeChecker {
    pub fn new(timeout_seconds: u64, use_mock: bool) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds),
            use_mock,
        }
    }

    /// Look up registration age and registrar. Never fails: lookup problems
    /// come back as `DomainAgeInfo` with the error field set ("unknown age"
    /// treatment downstream).
    pub async fn lookup(&self, domain: &str) -> DomainAgeInfo {
        if domain.is_empty() || !domain.contains('.') {
            return DomainAgeInfo::unknown(format!("invalid domain format: {domain}"));
        }

        if self.use_mock {
            return self.mock_info(domain);
        }

        let whois_server = Self::whois_server_for(domain);
        log::debug!("querying WHOIS server {whois_server} for {domain}");

        match self.query_whois_server(&whois_server, domain).await {
            Ok(text) => self.parse_whois_text(&text),
            Err(e) => {
                log::debug!("WHOIS query failed for {domain}: {e}");
                self.try_fallback_servers(domain).await
            }
        }
    }

    /// Determine the appropriate WHOIS server for a domain.
    fn whois_server_for(domain: &str) -> String {
        let tld = domain.split('.').next_back().unwrap_or(domain);

        let whois_servers = HashMap::from([
            ("com", "whois.verisign-grs.com"),
            ("net", "whois.verisign-grs.com"),
            ("org", "whois.pir.org"),
            ("info", "whois.afilias.net"),
            ("biz", "whois.neulevel.biz"),
            ("us", "whois.nic.us"),
            ("uk", "whois.nic.uk"),
            ("de", "whois.denic.de"),
            ("fr", "whois.afnic.fr"),
            ("it", "whois.nic.it"),
            ("nl", "whois.domain-registry.nl"),
            ("au", "whois.auda.org.au"),
            ("ca", "whois.cira.ca"),
            ("jp", "whois.jprs.jp"),
            ("cn", "whois.cnnic.cn"),
            ("ru", "whois.tcinet.ru"),
            ("br", "whois.registro.br"),
            ("mx", "whois.mx"),
            ("tk", "whois.dot.tk"),
            ("ml", "whois.dot.ml"),
            ("ga", "whois.dot.ga"),
            ("cf", "whois.dot.cf"),
        ]);

        whois_servers
            .get(tld)
            .copied()
            .unwrap_or("whois.iana.org")
            .to_string()
    }

    /// Query a WHOIS server directly on TCP port 43.
    async fn query_whois_server(&self, server: &str, domain: &str) -> Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;
        use tokio::time::timeout;

        let mut stream =
            timeout(self.timeout, TcpStream::connect(format!("{server}:43"))).await??;

        let query = format!("{domain}\r\n");
        stream.write_all(query.as_bytes()).await?;

        let mut response = String::new();
        timeout(self.timeout, stream.read_to_string(&mut response)).await??;

        if response.is_empty() {
            return Err(anyhow!("empty WHOIS response"));
        }

        Ok(response)
    }

    async fn try_fallback_servers(&self, domain: &str) -> DomainAgeInfo {
        for server in ["whois.iana.org", "whois.internic.net"] {
            log::debug!("trying fallback WHOIS server {server} for {domain}");
            if let Ok(text) = self.query_whois_server(server, domain).await {
                let info = self.parse_whois_text(&text);
                if info.age_days.is_some() {
                    return info;
                }
            }
        }

        DomainAgeInfo::unknown("all WHOIS servers failed".to_string())
    }

    fn parse_whois_text(&self, text: &str) -> DomainAgeInfo {
        // Common creation-date labels, including registry-specific and
        // international variants.
        let patterns = [
            r"(?i)creation\s*date[:\s]+([^\r\n]+)",
            r"(?i)created[:\s]+([^\r\n]+)",
            r"(?i)registered[:\s]+([^\r\n]+)",
            r"(?i)domain\s*created[:\s]+([^\r\n]+)",
            r"(?i)registration\s*date[:\s]+([^\r\n]+)",
            r"(?i)created\s*on[:\s]+([^\r\n]+)",
            r"(?i)registered\s*on[:\s]+([^\r\n]+)",
            r"(?i)domain_date_created[:\s]+([^\r\n]+)",
            r"(?i)create_date[:\s]+([^\r\n]+)",
            r"(?i)registration_time[:\s]+([^\r\n]+)",
            r"(?i)fecha\s*de\s*creaci[oó]n[:\s]+([^\r\n]+)",
            r"(?i)date\s*de\s*cr[eé]ation[:\s]+([^\r\n]+)",
            r"(?i)erstellt\s*am[:\s]+([^\r\n]+)",
        ];

        let registrar = RE_REGISTRAR
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|r| !r.is_empty());

        for pattern in patterns {
            let Ok(regex) = Regex::new(pattern) else {
                continue;
            };
            let Some(date_str) = regex
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim())
            else {
                continue;
            };

            if let Some(created_at) = parse_date_string(date_str) {
                let age_days = age_in_days(created_at);
                log::debug!("parsed WHOIS creation date {date_str} ({age_days} days old)");
                return DomainAgeInfo {
                    age_days: Some(age_days),
                    registrar,
                    created_at: Some(created_at),
                    error: None,
                };
            }
        }

        DomainAgeInfo {
            age_days: None,
            registrar,
            created_at: None,
            error: Some("no creation date in WHOIS response".to_string()),
        }
    }

    fn mock_info(&self, domain: &str) -> DomainAgeInfo {
        let mock_data = HashMap::from([
            ("psybook.info", 90u32),
            ("example.com", 8000),
            ("google.com", 9000),
            ("suspicious.tk", 12),
            ("newdomain.info", 45),
            ("established.org", 3650),
            ("fresh-phish.com", 5),
        ]);

        if domain == "timeout.test" {
            return DomainAgeInfo::unknown("WHOIS lookup timed out (mock)".to_string());
        }

        let age_days = mock_data.get(domain).copied().unwrap_or(365);
        let created_at = Utc::now() - chrono::Duration::days(age_days as i64);

        DomainAgeInfo {
            age_days: Some(age_days),
            registrar: Some("Mock Registrar, Inc.".to_string()),
            created_at: Some(created_at),
            error: None,
        }
    }
}

/// Parse the date formats commonly seen in WHOIS responses.
fn parse_date_string(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();

    let formats = ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];
    for format in formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(date_str, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }

    for format in ["%d-%m-%Y", "%m/%d/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }

    // Last resort: an ISO date embedded somewhere in the value.
    let captures = RE_ISO_DATE.captures(date_str)?;
    let year: i32 = captures[1].parse().ok()?;
    let month: u32 = captures[2].parse().ok()?;
    let day: u32 = captures[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn age_in_days(created_at: DateTime<Utc>) -> u32 {
    (Utc::now() - created_at).num_days().max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date_string("2024-10-10").is_some());
        assert!(parse_date_string("2024-10-10T12:00:00Z").is_some());
        assert!(parse_date_string("2024-10-10 12:00:00").is_some());
        assert!(parse_date_string("10.10.2024").is_some());
        assert!(parse_date_string("2024-10-10T12:00:00+0000 weird suffix").is_some());
        assert!(parse_date_string("not a date").is_none());
    }

    #[test]
    fn test_whois_server_selection() {
        assert_eq!(
            DomainAgeChecker::whois_server_for("example.com"),
            "whois.verisign-grs.com"
        );
        assert_eq!(
            DomainAgeChecker::whois_server_for("example.de"),
            "whois.denic.de"
        );
        assert_eq!(
            DomainAgeChecker::whois_server_for("example.unknown-tld"),
            "whois.iana.org"
        );
    }

    #[test]
    fn test_parse_whois_text() {
        let checker = DomainAgeChecker::new(5, false);
        let text = "Domain Name: EXAMPLE.COM\r\n\
                    Registrar: Example Registrar LLC\r\n\
                    Creation Date: 2020-01-15T04:00:00Z\r\n";
        let info = checker.parse_whois_text(text);
        assert!(info.age_days.unwrap() > 365);
        assert_eq!(info.registrar.as_deref(), Some("Example Registrar LLC"));
        assert!(info.error.is_none());
    }

    #[test]
    fn test_parse_whois_text_without_date() {
        let checker = DomainAgeChecker::new(5, false);
        let info = checker.parse_whois_text("Domain Name: EXAMPLE.COM\r\n");
        assert!(info.age_days.is_none());
        assert!(info.error.is_some());
    }

    #[tokio::test]
    async fn test_mock_ages() {
        let checker = DomainAgeChecker::new(5, true);

        let young = checker.lookup("suspicious.tk").await;
        assert_eq!(young.age_days, Some(12));

        let old = checker.lookup("google.com").await;
        assert!(old.age_days.unwrap() > 1000);

        let errored = checker.lookup("timeout.test").await;
        assert!(errored.age_days.is_none());
        assert!(errored.error.is_some());
    }

    #[tokio::test]
    async fn test_invalid_domain_is_recorded_not_raised() {
        let checker = DomainAgeChecker::new(5, true);
        let info = checker.lookup("nodots").await;
        assert!(info.age_days.is_none());
        assert!(info.error.as_deref().unwrap_or("").contains("invalid"));
    }
}
