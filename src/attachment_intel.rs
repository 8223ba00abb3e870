use base64::prelude::*;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{AttachmentWeights, ScoringConfig};
use crate::hashing::DigestSet;
use crate::record::AttachmentInput;

/// Extensions that deliver executables, scripts or droppers.
const DANGEROUS_EXTENSIONS: [&str; 16] = [
    ".exe", ".scr", ".bat", ".cmd", ".com", ".pif", ".vbs", ".js", ".jar", ".app", ".msi",
    ".run", ".ps1", ".hta", ".zip", ".rar",
];

/// Malware-hash database result for one digest, keyed by sha256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalwareCheck {
    pub known_malware: bool,
    pub detections: Vec<String>,
    pub positives: u32,
    pub total: u32,
    pub last_checked: DateTime<Utc>,
    /// Set when the database could not be queried; the attachment counts
    /// as "unchecked", never as clean.
    pub error: Option<String>,
}

impl MalwareCheck {
    fn unchecked(error: String) -> Self {
        Self {
            known_malware: false,
            detections: Vec::new(),
            positives: 0,
            total: 0,
            last_checked: Utc::now(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentFinding {
    pub filename: String,
    pub declared_mime: String,
    pub detected_mime: Option<String>,
    pub size: usize,
    pub digests: Option<DigestSet>,
    pub original_digests: Option<DigestSet>,
    pub malware: Option<MalwareCheck>,
    /// Any digest drift against the stored originals. Always a positive
    /// signal, independent of the malware verdict.
    pub tampered: bool,
    pub indicators: Vec<String>,
    pub risk_score: u32,
    pub error: Option<String>,
}

pub struct AttachmentIntelligence {
    client: Client,
    endpoint: String,
    api_key: String,
    weights: AttachmentWeights,
    use_mock: bool,
}

impl AttachmentIntelligence {
    pub fn new(config: &ScoringConfig, use_mock: bool) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.limits.call_timeout_seconds))
            .user_agent(concat!("mailrisk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config
                .services
                .malware_hash_endpoint
                .trim_end_matches('/')
                .to_string(),
            api_key: config.services.malware_api_key.clone().unwrap_or_default(),
            weights: config.weights.attachment.clone(),
            use_mock,
        })
    }

    /// Full analysis of one attachment: digests, tamper check, malware
    /// lookup, type mismatch and extension heuristics. Infallible.
    pub async fn analyze(&self, input: &AttachmentInput) -> AttachmentFinding {
        let mut finding = self.analyze_local(input);

        if let Some(digests) = finding.digests.clone() {
            let malware = self.lookup_hash(&digests.sha256).await;
            if malware.known_malware {
                finding
                    .indicators
                    .push("matches a known malware hash".to_string());
            }
            finding.malware = Some(malware);
        }

        self.score(&mut finding);
        finding
    }

    /// Hash and heuristic analysis only, used when the global deadline has
    /// cancelled external lookups. The malware check is recorded as
    /// unchecked with the given error.
    pub fn analyze_static(&self, input: &AttachmentInput, error: &str) -> AttachmentFinding {
        let mut finding = self.analyze_local(input);
        if finding.digests.is_some() {
            finding.malware = Some(MalwareCheck::unchecked(error.to_string()));
        }
        self.score(&mut finding);
        finding
    }

    fn analyze_local(&self, input: &AttachmentInput) -> AttachmentFinding {
        let mut finding = AttachmentFinding {
            filename: input.filename.clone(),
            declared_mime: input.content_type.clone(),
            detected_mime: None,
            size: 0,
            digests: None,
            original_digests: input.original_digests.clone(),
            malware: None,
            tampered: false,
            indicators: Vec::new(),
            risk_score: 0,
            error: None,
        };

        match BASE64_STANDARD.decode(&input.content) {
            Ok(bytes) => {
                finding.size = bytes.len();
                finding.detected_mime = sniff_mime(&bytes);
                finding.digests = Some(DigestSet::compute(&bytes));
            }
            Err(e) => {
                finding.error = Some(format!("undecodable attachment payload: {e}"));
            }
        }

        if let (Some(current), Some(original)) = (&finding.digests, &finding.original_digests) {
            let drifted = current.drift_from(original);
            if !drifted.is_empty() {
                finding.tampered = true;
                finding
                    .indicators
                    .push(format!("content hash drift ({})", drifted.join(", ")));
            }
        }

        let name_lower = input.filename.to_lowercase();
        if DANGEROUS_EXTENSIONS.iter().any(|ext| name_lower.ends_with(ext)) {
            finding
                .indicators
                .push("dangerous file extension".to_string());
        }

        if let Some(detected) = &finding.detected_mime {
            let declared = input.content_type.to_lowercase();
            if !declared.is_empty()
                && declared != "application/octet-stream"
                && declared != *detected
            {
                finding.indicators.push(format!(
                    "declared type {declared} does not match detected {detected}"
                ));
            }
        }

        finding
    }

    async fn lookup_hash(&self, sha256: &str) -> MalwareCheck {
        if self.use_mock {
            return Self::mock_check(sha256);
        }

        let url = format!("{}/{sha256}", self.endpoint);
        let response = match self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return MalwareCheck::unchecked(e.to_string()),
        };

        // An unknown hash is a clean "not found", not a failure.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return MalwareCheck {
                known_malware: false,
                detections: Vec::new(),
                positives: 0,
                total: 0,
                last_checked: Utc::now(),
                error: None,
            };
        }

        if !response.status().is_success() {
            return MalwareCheck::unchecked(format!(
                "hash database returned {}",
                response.status()
            ));
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return MalwareCheck::unchecked(format!("bad hash-report payload: {e}")),
        };

        let stats = &body["data"]["attributes"]["last_analysis_stats"];
        let positives = stats["malicious"].as_u64().unwrap_or(0) as u32;
        let total = stats
            .as_object()
            .map(|m| m.values().filter_map(|v| v.as_u64()).sum::<u64>() as u32)
            .unwrap_or(0);

        let detections = body["data"]["attributes"]["last_analysis_results"]
            .as_object()
            .map(|results| {
                results
                    .iter()
                    .filter(|(_, r)| r["category"].as_str() == Some("malicious"))
                    .map(|(engine, _)| engine.clone())
                    .collect()
            })
            .unwrap_or_default();

        MalwareCheck {
            known_malware: positives > 0,
            detections,
            positives,
            total,
            last_checked: Utc::now(),
            error: None,
        }
    }

    fn mock_check(sha256: &str) -> MalwareCheck {
        // sha256 of b"malware-sample" in the test fixtures.
        if sha256 == DigestSet::compute(b"malware-sample").sha256 {
            return MalwareCheck {
                known_malware: true,
                detections: vec!["MockAV".to_string(), "ExampleScan".to_string()],
                positives: 2,
                total: 70,
                last_checked: Utc::now(),
                error: None,
            };
        }
        MalwareCheck {
            known_malware: false,
            detections: Vec::new(),
            positives: 0,
            total: 70,
            last_checked: Utc::now(),
            error: None,
        }
    }

    fn score(&self, finding: &mut AttachmentFinding) {
        let w = &self.weights;
        let mut score = 0u32;

        if finding
            .malware
            .as_ref()
            .map(|m| m.known_malware)
            .unwrap_or(false)
        {
            score += w.known_malware;
        }
        if finding.tampered {
            score += w.tampered;
        }
        if finding
            .indicators
            .iter()
            .any(|i| i.contains("does not match detected"))
        {
            score += w.mime_mismatch;
        }
        if finding
            .indicators
            .iter()
            .any(|i| i == "dangerous file extension")
        {
            score += w.dangerous_extension;
        }

        finding.risk_score = score.min(100);
    }
}

/// Magic-byte content sniffing for the handful of types that matter here.
fn sniff_mime(bytes: &[u8]) -> Option<String> {
    let mime = if bytes.starts_with(b"%PDF") {
        "application/pdf"
    } else if bytes.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if bytes.starts_with(b"MZ") {
        "application/x-msdownload"
    } else if bytes.starts_with(&[0x7f, b'E', b'L', b'F']) {
        "application/x-executable"
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.starts_with(b"{\\rtf") {
        "application/rtf"
    } else if bytes.starts_with(b"Rar!") {
        "application/x-rar-compressed"
    } else if std::str::from_utf8(bytes).is_ok() {
        "text/plain"
    } else {
        return None;
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intel() -> AttachmentIntelligence {
        AttachmentIntelligence::new(&ScoringConfig::default(), true).unwrap()
    }

    fn input(filename: &str, content_type: &str, bytes: &[u8]) -> AttachmentInput {
        AttachmentInput {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            content: BASE64_STANDARD.encode(bytes),
            original_digests: None,
        }
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"%PDF-1.7 rest").as_deref(), Some("application/pdf"));
        assert_eq!(
            sniff_mime(b"MZ\x90\x00binary").as_deref(),
            Some("application/x-msdownload")
        );
        assert_eq!(sniff_mime(b"just some text").as_deref(), Some("text/plain"));
        assert_eq!(sniff_mime(&[0x00, 0x01, 0xfe, 0xff]), None);
    }

    #[tokio::test]
    async fn test_masquerading_executable_outscores_honest_pdf() {
        let masquerading = intel()
            .analyze(&input("invoice.exe", "application/pdf", b"MZ\x90\x00payload"))
            .await;
        let honest = intel()
            .analyze(&input("report.pdf", "application/pdf", b"%PDF-1.7 content"))
            .await;

        let w = AttachmentWeights::default();
        assert!(masquerading.risk_score >= w.dangerous_extension + w.mime_mismatch);
        assert_eq!(honest.risk_score, 0);
        assert!(masquerading.risk_score > honest.risk_score);
    }

    #[tokio::test]
    async fn test_tamper_detected_regardless_of_malware_outcome() {
        let mut tampered_input = input("contract.pdf", "application/pdf", b"%PDF-1.7 edited");
        tampered_input.original_digests = Some(DigestSet::compute(b"%PDF-1.7 original"));

        let finding = intel().analyze(&tampered_input).await;
        assert!(finding.tampered);
        // Malware lookup came back clean, the tamper verdict stands.
        assert!(!finding.malware.as_ref().unwrap().known_malware);
        assert!(finding.risk_score >= AttachmentWeights::default().tampered);
    }

    #[tokio::test]
    async fn test_unchanged_digests_are_not_tampering() {
        let mut clean_input = input("contract.pdf", "application/pdf", b"%PDF-1.7 original");
        clean_input.original_digests = Some(DigestSet::compute(b"%PDF-1.7 original"));

        let finding = intel().analyze(&clean_input).await;
        assert!(!finding.tampered);
        assert_eq!(finding.risk_score, 0);
    }

    #[tokio::test]
    async fn test_known_malware_hash() {
        let finding = intel()
            .analyze(&input("update.bin", "application/octet-stream", b"malware-sample"))
            .await;
        let malware = finding.malware.as_ref().unwrap();
        assert!(malware.known_malware);
        assert_eq!(malware.positives, 2);
        assert!(finding.risk_score >= AttachmentWeights::default().known_malware);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_recorded() {
        let mut bad = input("x.bin", "application/octet-stream", b"");
        bad.content = "!!!not-base64!!!".to_string();

        let finding = intel().analyze(&bad).await;
        assert!(finding.error.is_some());
        assert!(finding.digests.is_none());
        assert!(finding.malware.is_none());
    }

    #[test]
    fn test_static_analysis_marks_malware_unchecked() {
        let finding =
            intel().analyze_static(&input("a.exe", "", b"MZ\x90"), "analysis deadline exceeded");
        let malware = finding.malware.as_ref().unwrap();
        assert!(!malware.known_malware);
        assert!(malware.error.as_deref().unwrap().contains("deadline"));
        assert!(finding.risk_score >= AttachmentWeights::default().dangerous_extension);
    }
}
