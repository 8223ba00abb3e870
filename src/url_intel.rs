use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

use crate::aggregation::risk_level_for;
use crate::config::{ScoringConfig, UrlWeights};
use crate::domain_age::{DomainAgeChecker, DomainAgeInfo};
use crate::domain_utils::DomainUtils;
use crate::geolocation::{GeoLocator, GeoRecord};
use crate::lookup_cache::LookupCache;
use crate::record::RiskLevel;
use crate::reputation::{ReputationChecker, ReputationInfo};
use crate::ssl_check::{SslChecker, SslInfo};
use crate::url_resolver::{RedirectHop, UrlResolver};

/// Domains common enough to skip the unknown-domain baseline penalty.
const COMMON_DOMAINS: [&str; 10] = [
    "google.com",
    "microsoft.com",
    "apple.com",
    "amazon.com",
    "facebook.com",
    "github.com",
    "linkedin.com",
    "twitter.com",
    "instagram.com",
    "youtube.com",
];

/// Brand tokens paired with their canonical domain; a domain carrying the
/// token without being the brand (or its subdomain) is a lookalike.
const BRAND_DOMAINS: [(&str, &str); 6] = [
    ("paypal", "paypal.com"),
    ("google", "google.com"),
    ("microsoft", "microsoft.com"),
    ("apple", "apple.com"),
    ("amazon", "amazon.com"),
    ("facebook", "facebook.com"),
];

const DENYLISTED_TLDS: [&str; 8] = ["xyz", "tk", "ml", "ga", "cf", "gq", "top", "club"];

const SENSITIVE_PATH_KEYWORDS: [&str; 10] = [
    "secure", "login", "account", "update", "verify", "password", "bank", "paypal", "ebay",
    "amazon",
];

const MAX_EXPECTED_SUBDOMAINS: usize = 2;

/// Everything learned about one embedded URL. Option sub-records separate
/// "not attempted" from "attempted and failed" (which sets the inner
/// error field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlFinding {
    pub url: String,
    pub domain: Option<String>,
    pub is_shortener: bool,
    pub expanded_url: Option<String>,
    pub redirect_chain: Vec<RedirectHop>,
    pub ssl: Option<SslInfo>,
    pub domain_age: Option<DomainAgeInfo>,
    pub reputation: Option<ReputationInfo>,
    pub resolved_ips: Vec<IpAddr>,
    pub geo: Vec<GeoRecord>,
    pub reasons: Vec<String>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub error: Option<String>,
}

impl UrlFinding {
    fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            domain: None,
            is_shortener: false,
            expanded_url: None,
            redirect_chain: Vec::new(),
            ssl: None,
            domain_age: None,
            reputation: None,
            resolved_ips: Vec::new(),
            geo: Vec::new(),
            reasons: Vec::new(),
            risk_score: 0,
            risk_level: RiskLevel::Low,
            error: None,
        }
    }
}

/// Per-URL fan-out of expansion, redirects, certificate, age, reputation
/// and geolocation lookups, plus the additive scoring rule.
pub struct UrlIntelligence {
    resolver: UrlResolver,
    ssl: SslChecker,
    age: DomainAgeChecker,
    reputation: ReputationChecker,
    geo: GeoLocator,
    geo_cache: Arc<LookupCache<GeoRecord>>,
    age_cache: Arc<LookupCache<DomainAgeInfo>>,
    reputation_cache: Arc<LookupCache<ReputationInfo>>,
    weights: UrlWeights,
    young_domain_days: u32,
    use_mock: bool,
}

impl UrlIntelligence {
    pub fn new(config: &ScoringConfig, use_mock: bool) -> anyhow::Result<Self> {
        let timeout = config.limits.call_timeout_seconds;
        let ttl = config.limits.cache_ttl_days;

        Ok(Self {
            resolver: UrlResolver::new(timeout, config.limits.max_redirect_hops)?,
            ssl: SslChecker::new(timeout, use_mock),
            age: DomainAgeChecker::new(timeout, use_mock),
            reputation: ReputationChecker::new(
                config.services.reputation_endpoint.clone(),
                config.services.reputation_api_key.clone(),
                timeout,
                use_mock,
            )?,
            geo: GeoLocator::new(config.services.geolocation_endpoint.clone(), timeout, use_mock)?,
            geo_cache: Arc::new(LookupCache::new(ttl)),
            age_cache: Arc::new(LookupCache::new(ttl)),
            reputation_cache: Arc::new(LookupCache::new(ttl)),
            weights: config.weights.url.clone(),
            young_domain_days: config.limits.young_domain_days,
            use_mock,
        })
    }

    /// Full analysis of one URL. Infallible: a malformed URL yields a
    /// penalized finding, external failures are recorded per sub-check.
    pub async fn analyze(&self, raw_url: &str) -> UrlFinding {
        let normalized = normalize_url(raw_url);

        let parsed = match Url::parse(&normalized) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("unparseable URL {raw_url}: {e}");
                let mut finding = UrlFinding::empty(raw_url);
                finding.error = Some(format!("malformed URL: {e}"));
                finding.reasons.push("invalid or malformed URL".to_string());
                finding.risk_score = self.weights.malformed.min(100);
                finding.risk_level = risk_level_for(finding.risk_score);
                return finding;
            }
        };

        let mut finding = UrlFinding::empty(raw_url);

        let host = parsed.host_str().unwrap_or_default().to_string();
        let domain = DomainUtils::canonicalize_domain(&host);
        finding.domain = Some(domain.clone());
        finding.is_shortener = UrlResolver::is_shortener(&domain);

        if finding.is_shortener && !self.use_mock {
            match self.resolver.expand(&normalized).await {
                Ok(expanded) if expanded != normalized => {
                    finding.expanded_url = Some(expanded);
                }
                Ok(_) => {}
                Err(e) => {
                    // Expansion failure is recorded without touching the
                    // other signals.
                    finding.error = Some(format!("shortener expansion failed: {e}"));
                }
            }
        }

        let ip_literal = DomainUtils::is_ipv4_literal(&domain);
        let root = DomainUtils::root_domain(&domain);

        // Independent external signals run concurrently; each records its
        // own failure and none can veto the others.
        let redirect_walk = async {
            if self.use_mock {
                (Vec::new(), None)
            } else {
                self.resolver.follow_redirects(&normalized).await
            }
        };

        let (redirects, ssl, age, reputation, ips) = tokio::join!(
            redirect_walk,
            self.ssl.check(&domain),
            self.age_cache.get_or_fetch(&root, self.age.lookup(&root)),
            self.reputation_cache
                .get_or_fetch(&domain, self.reputation.lookup(&domain)),
            self.resolve_ips_logged(&domain, ip_literal),
        );

        let (chain, redirect_error) = redirects;
        finding.redirect_chain = chain;
        if let Some(e) = redirect_error {
            log::debug!("redirect walk for {normalized} stopped: {e}");
            if finding.error.is_none() {
                finding.error = Some(format!("redirect walk failed: {e}"));
            }
        }
        finding.ssl = Some(ssl);
        finding.domain_age = Some(age);
        finding.reputation = Some(reputation);
        finding.resolved_ips = ips;

        for ip in finding.resolved_ips.clone() {
            let record = self
                .geo_cache
                .get_or_fetch(&ip.to_string(), self.geo.lookup(ip))
                .await;
            finding.geo.push(record);
        }

        self.score(&mut finding, &parsed, &domain, ip_literal);
        finding
    }

    /// Lexical-signal-only finding, used when the global deadline cancels
    /// the external lookups. No I/O.
    pub fn analyze_static(&self, raw_url: &str, error: &str) -> UrlFinding {
        let normalized = normalize_url(raw_url);

        let parsed = match Url::parse(&normalized) {
            Ok(parsed) => parsed,
            Err(e) => {
                let mut finding = UrlFinding::empty(raw_url);
                finding.error = Some(format!("malformed URL: {e}"));
                finding.reasons.push("invalid or malformed URL".to_string());
                finding.risk_score = self.weights.malformed.min(100);
                finding.risk_level = risk_level_for(finding.risk_score);
                return finding;
            }
        };

        let mut finding = UrlFinding::empty(raw_url);
        let host = parsed.host_str().unwrap_or_default().to_string();
        let domain = DomainUtils::canonicalize_domain(&host);
        let ip_literal = DomainUtils::is_ipv4_literal(&domain);
        finding.domain = Some(domain.clone());
        finding.is_shortener = UrlResolver::is_shortener(&domain);
        finding.error = Some(error.to_string());

        self.score(&mut finding, &parsed, &domain, ip_literal);
        finding
    }

    async fn resolve_ips_logged(&self, domain: &str, ip_literal: bool) -> Vec<IpAddr> {
        if ip_literal {
            return domain.parse::<IpAddr>().into_iter().collect();
        }
        match self.geo.resolve_ips(domain).await {
            Ok(ips) => ips,
            Err(e) => {
                log::debug!("DNS resolution failed for {domain}: {e}");
                Vec::new()
            }
        }
    }

    /// Additive scoring rule: every signal triggers independently, the sum
    /// is clamped, and a clean-but-unknown domain still gets a baseline.
    fn score(&self, finding: &mut UrlFinding, parsed: &Url, domain: &str, ip_literal: bool) {
        let w = &self.weights;
        let mut score = 0u32;
        let mut reasons = std::mem::take(&mut finding.reasons);

        if ip_literal {
            score += w.ip_literal;
            reasons.push("URL uses IP address instead of domain name".to_string());
        }

        if let Some(tld) = DomainUtils::tld(domain) {
            if DENYLISTED_TLDS.contains(&tld.as_str()) {
                score += w.denylisted_tld;
                reasons.push(format!("URL uses uncommon TLD (.{tld})"));
            }
        }

        if !ip_literal {
            let subdomains = DomainUtils::subdomain_count(domain);
            if subdomains > MAX_EXPECTED_SUBDOMAINS {
                score += w.excessive_subdomains;
                reasons.push(format!("URL has {subdomains} subdomains"));
            }
        }

        let path = parsed.path().to_lowercase();
        if SENSITIVE_PATH_KEYWORDS.iter().any(|kw| path.contains(kw)) {
            score += w.sensitive_path;
            reasons.push("URL path contains sensitive keywords".to_string());
        }

        if finding.is_shortener {
            score += w.shortener;
            reasons.push("URL uses a URL shortening service".to_string());
        }

        for (token, canonical) in BRAND_DOMAINS {
            if domain.contains(token) && !DomainUtils::matches_domain_list(domain, &[canonical]) {
                score += w.brand_lookalike;
                reasons.push(format!("URL may be impersonating {canonical}"));
                break;
            }
        }

        if let Some(ssl) = &finding.ssl {
            if !ssl.valid {
                score += w.ssl_invalid;
                reasons.push("SSL certificate invalid or unverifiable".to_string());
            }
        }

        if let Some(age) = &finding.domain_age {
            if let Some(days) = age.age_days {
                if days < self.young_domain_days {
                    score += w.young_domain;
                    reasons.push(format!("domain registered only {days} days ago"));
                }
            }
        }

        if let Some(reputation) = &finding.reputation {
            if reputation.malicious > 0 {
                score += w.per_malicious_report * reputation.malicious;
                reasons.push(format!(
                    "{} engines report the domain as malicious",
                    reputation.malicious
                ));
            }
        }

        if finding.geo.iter().any(|g| g.vpn.is_vpn_or_proxy) {
            score += w.anonymized_hosting;
            reasons.push("hosted behind VPN/proxy or datacenter address space".to_string());
        }

        if crossed_domains(&finding.redirect_chain) {
            score += w.cross_domain_redirect;
            reasons.push("URL redirects to a different domain".to_string());
        }

        if reasons.is_empty() && !DomainUtils::matches_domain_list(domain, &COMMON_DOMAINS) {
            score = w.unknown_domain_baseline;
            reasons.push("URL is not from a commonly recognized domain".to_string());
        }

        finding.reasons = reasons;
        finding.risk_score = score.min(100);
        finding.risk_level = risk_level_for(finding.risk_score);
    }
}

/// Prepend a scheme when the extractor captured a bare host.
fn normalize_url(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

fn crossed_domains(chain: &[RedirectHop]) -> bool {
    let domain_of = |hop: &RedirectHop| {
        Url::parse(&hop.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| DomainUtils::canonicalize_domain(h)))
            .map(|d| DomainUtils::root_domain(&d))
    };

    match (chain.first().and_then(domain_of), chain.last().and_then(domain_of)) {
        (Some(first), Some(last)) => first != last,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use chrono::Utc;

    fn intel() -> UrlIntelligence {
        UrlIntelligence::new(&ScoringConfig::default(), true).unwrap()
    }

    fn static_finding(url: &str) -> UrlFinding {
        intel().analyze_static(url, "test")
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("www.example.com/a"), "https://www.example.com/a");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
    }

    #[test]
    fn test_ip_literal_scores_at_least_its_penalty() {
        let finding = static_finding("http://203.0.113.5/login");
        let w = UrlWeights::default();
        assert!(finding.risk_score >= w.ip_literal);
        assert!(finding
            .reasons
            .iter()
            .any(|r| r.contains("IP address")));
    }

    #[test]
    fn test_malformed_url_gets_fixed_penalty() {
        let finding = static_finding("http://exa mple.com/x");
        assert_eq!(finding.risk_score, UrlWeights::default().malformed);
        assert!(finding.error.as_deref().unwrap_or("").contains("malformed"));
    }

    #[test]
    fn test_denylisted_tld_and_subdomains() {
        let finding = static_finding("https://a.b.c.promo.tk/offer");
        let w = UrlWeights::default();
        assert!(finding.risk_score >= w.denylisted_tld + w.excessive_subdomains);
    }

    #[test]
    fn test_brand_lookalike() {
        let finding = static_finding("https://paypal-secure-login.com/");
        let w = UrlWeights::default();
        assert!(finding.risk_score >= w.brand_lookalike);
        assert!(finding.reasons.iter().any(|r| r.contains("paypal.com")));

        // The real brand domain and its subdomains are not lookalikes.
        let finding = static_finding("https://www.paypal.com/");
        assert!(!finding.reasons.iter().any(|r| r.contains("impersonating")));
    }

    #[test]
    fn test_shortener_flagged() {
        let finding = static_finding("https://bit.ly/abc");
        assert!(finding.is_shortener);
        assert!(finding.risk_score >= UrlWeights::default().shortener);
    }

    #[test]
    fn test_unknown_domain_baseline() {
        let finding = static_finding("https://quiet-unremarkable-site.net/");
        assert_eq!(finding.risk_score, UrlWeights::default().unknown_domain_baseline);
        assert_eq!(finding.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_allowlisted_domain_scores_zero() {
        let finding = static_finding("https://github.com/some/repo");
        assert_eq!(finding.risk_score, 0);
        assert!(finding.reasons.is_empty());
    }

    #[test]
    fn test_cross_domain_redirect_detection() {
        let hop = |url: &str| RedirectHop {
            url: url.to_string(),
            status: 301,
            observed_at: Utc::now(),
        };
        assert!(crossed_domains(&[
            hop("https://start.example.com/a"),
            hop("https://evil.example.net/b"),
        ]));
        assert!(!crossed_domains(&[
            hop("https://start.example.com/a"),
            hop("https://www.example.com/b"),
        ]));
        assert!(!crossed_domains(&[]));
    }

    #[tokio::test]
    async fn test_mock_analysis_populates_sub_findings() {
        let finding = intel().analyze("https://fake-bank-verification.com/login").await;

        assert_eq!(finding.domain.as_deref(), Some("fake-bank-verification.com"));
        assert!(finding.ssl.is_some());
        assert!(finding.domain_age.is_some());
        assert!(finding.reputation.is_some());
        assert!(!finding.resolved_ips.is_empty());
        assert_eq!(finding.geo.len(), finding.resolved_ips.len());
        assert!(finding.risk_score >= UrlWeights::default().sensitive_path);
    }

    #[tokio::test]
    async fn test_reputation_failure_still_scores() {
        let finding = intel().analyze("https://timeout.test/path").await;

        let reputation = finding.reputation.as_ref().unwrap();
        assert!(reputation.error.is_some());
        // Finite score despite the failed lookup.
        assert!(finding.risk_score <= 100);
        assert!(!finding.reasons.is_empty() || finding.risk_score == 0);
    }

    #[tokio::test]
    async fn test_young_domain_penalized() {
        let finding = intel().analyze("https://fresh-phish.com/").await;
        let w = UrlWeights::default();
        assert!(finding.risk_score >= w.young_domain);
        assert!(finding
            .reasons
            .iter()
            .any(|r| r.contains("days ago")));
    }
}
