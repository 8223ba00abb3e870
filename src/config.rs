use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::record::RiskLevel;

/// Top-level pipeline configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub services: ServiceConfig,
    #[serde(default)]
    pub limits: LimitConfig,
    #[serde(default)]
    pub weights: ScoreWeights,
    /// Emails at or above this risk level get the `flagged` bit.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: RiskLevel,
}

fn default_flag_threshold() -> RiskLevel {
    RiskLevel::High
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            services: ServiceConfig::default(),
            limits: LimitConfig::default(),
            weights: ScoreWeights::default(),
            flag_threshold: default_flag_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// VirusTotal-style v3 API base for domain reputation.
    pub reputation_endpoint: String,
    pub reputation_api_key: Option<String>,
    /// ipwho.is-style geolocation endpoint.
    pub geolocation_endpoint: String,
    /// Malware hash database endpoint (file reports keyed by digest).
    pub malware_hash_endpoint: String,
    pub malware_api_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reputation_endpoint: "https://www.virustotal.com/api/v3".to_string(),
            reputation_api_key: None,
            geolocation_endpoint: "https://ipwho.is".to_string(),
            malware_hash_endpoint: "https://www.virustotal.com/api/v3/files".to_string(),
            malware_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Ceiling for each individual external call.
    pub call_timeout_seconds: u64,
    /// Deadline for the whole per-email analysis; outstanding lookups are
    /// cancelled and recorded as timeouts when it elapses.
    pub global_deadline_seconds: u64,
    /// Concurrent URL/attachment tasks per email.
    pub fan_out_limit: usize,
    pub max_redirect_hops: usize,
    /// Retention ceiling for cached lookups.
    pub cache_ttl_days: i64,
    /// Domains younger than this are penalized.
    pub young_domain_days: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            call_timeout_seconds: 5,
            global_deadline_seconds: 30,
            fan_out_limit: 8,
            max_redirect_hops: 5,
            cache_ttl_days: 30,
            young_domain_days: 30,
        }
    }
}

/// All heuristic weights in one place so they can be recalibrated without
/// code changes. Defaults are the values observed in production.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default)]
    pub header: HeaderWeights,
    #[serde(default)]
    pub content: ContentWeights,
    #[serde(default)]
    pub url: UrlWeights,
    #[serde(default)]
    pub attachment: AttachmentWeights,
    #[serde(default)]
    pub aggregation: AggregationWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderWeights {
    pub noreply_sender: u32,
    pub sensitive_sender: u32,
    pub excessive_hops: u32,
    pub known_relay: u32,
    pub return_path_mismatch: u32,
    pub reply_to_mismatch: u32,
}

impl Default for HeaderWeights {
    fn default() -> Self {
        Self {
            noreply_sender: 5,
            sensitive_sender: 10,
            excessive_hops: 10,
            known_relay: 15,
            return_path_mismatch: 15,
            reply_to_mismatch: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentWeights {
    pub urgency: u32,
    pub financial_terms: u32,
    pub credential_request: u32,
    pub misspellings: u32,
    pub subject_sensational: u32,
}

impl Default for ContentWeights {
    fn default() -> Self {
        Self {
            urgency: 10,
            financial_terms: 15,
            credential_request: 20,
            misspellings: 15,
            subject_sensational: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlWeights {
    pub ip_literal: u32,
    pub denylisted_tld: u32,
    pub excessive_subdomains: u32,
    pub sensitive_path: u32,
    pub shortener: u32,
    pub brand_lookalike: u32,
    pub ssl_invalid: u32,
    pub young_domain: u32,
    pub per_malicious_report: u32,
    pub anonymized_hosting: u32,
    pub cross_domain_redirect: u32,
    pub malformed: u32,
    pub unknown_domain_baseline: u32,
}

impl Default for UrlWeights {
    fn default() -> Self {
        Self {
            ip_literal: 25,
            denylisted_tld: 15,
            excessive_subdomains: 10,
            sensitive_path: 15,
            shortener: 20,
            brand_lookalike: 30,
            ssl_invalid: 25,
            young_domain: 20,
            per_malicious_report: 5,
            anonymized_hosting: 5,
            cross_domain_redirect: 15,
            malformed: 50,
            unknown_domain_baseline: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentWeights {
    pub known_malware: u32,
    pub tampered: u32,
    pub mime_mismatch: u32,
    pub dangerous_extension: u32,
}

impl Default for AttachmentWeights {
    fn default() -> Self {
        Self {
            known_malware: 60,
            tampered: 35,
            mime_mismatch: 25,
            dangerous_extension: 25,
        }
    }
}

/// Contribution (percent) of the worst attachment/URL score to the total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationWeights {
    pub attachment_weight_pct: u32,
    pub url_weight_pct: u32,
}

impl Default for AggregationWeights {
    fn default() -> Self {
        Self {
            attachment_weight_pct: 50,
            url_weight_pct: 50,
        }
    }
}

impl ScoringConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        let config: ScoringConfig =
            serde_yaml::from_str(&content).with_context(|| format!("invalid config: {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file: {path}"))?;
        Ok(())
    }

    /// Startup validation. Invalid configuration is the one fatal error in
    /// the pipeline; everything downstream is recorded as data.
    pub fn validate(&self, use_mock: bool) -> Result<()> {
        if self.limits.fan_out_limit == 0 {
            bail!("fan_out_limit must be at least 1");
        }
        if self.limits.call_timeout_seconds == 0 || self.limits.global_deadline_seconds == 0 {
            bail!("timeouts must be non-zero");
        }
        if self.limits.cache_ttl_days < 1 {
            bail!("cache_ttl_days must be at least 1");
        }
        if self.weights.aggregation.attachment_weight_pct > 100
            || self.weights.aggregation.url_weight_pct > 100
        {
            bail!("aggregation weights are percentages and must be <= 100");
        }
        if !use_mock {
            if self.services.reputation_api_key.as_deref().unwrap_or("").is_empty() {
                bail!("reputation_api_key is required (or run with mock lookups)");
            }
            if self.services.malware_api_key.as_deref().unwrap_or("").is_empty() {
                bail!("malware_api_key is required (or run with mock lookups)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_in_mock_mode() {
        let config = ScoringConfig::default();
        assert!(config.validate(true).is_ok());
        // Live mode needs credentials.
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_live_mode_with_keys_is_valid() {
        let mut config = ScoringConfig::default();
        config.services.reputation_api_key = Some("key".to_string());
        config.services.malware_api_key = Some("key".to_string());
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_bad_limits_rejected() {
        let mut config = ScoringConfig::default();
        config.limits.fan_out_limit = 0;
        assert!(config.validate(true).is_err());

        let mut config = ScoringConfig::default();
        config.weights.aggregation.url_weight_pct = 150;
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = ScoringConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ScoringConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            parsed.weights.content.financial_terms,
            config.weights.content.financial_terms
        );
        assert_eq!(parsed.flag_threshold, RiskLevel::High);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed: ScoringConfig =
            serde_yaml::from_str("limits:\n  fan_out_limit: 2\n").unwrap();
        assert_eq!(parsed.limits.fan_out_limit, 2);
        assert_eq!(parsed.limits.cache_ttl_days, 30);
        assert_eq!(parsed.weights.url.ip_literal, 25);
    }
}
