use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment_intel::AttachmentFinding;
use crate::header_analyzer::HeaderAnalysis;
use crate::url_intel::UrlFinding;

/// Normalized email as handed over by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailInput {
    pub message_id: String,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub raw_headers: String,
    /// URLs already extracted by the ingester. When empty, the pipeline
    /// re-extracts them from the body.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInput {
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    /// Base64-encoded attachment payload.
    #[serde(default)]
    pub content: String,
    /// Digests recorded when this attachment was first seen, if the
    /// persistence collaborator has them. Drift against the current
    /// digests is a tamper indicator.
    #[serde(default)]
    pub original_digests: Option<crate::hashing::DigestSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        };
        write!(f, "{s}")
    }
}

/// Reviewer-facing disposition. Only an external reviewer action changes
/// this; the pipeline never writes it after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    New,
    Reviewed,
    Quarantined,
    Safe,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub header: u32,
    pub text: u32,
    pub metadata: u32,
    /// Worst attachment score (max fold).
    pub attachments: u32,
    /// Worst URL score (max fold).
    pub urls: u32,
    /// Clamped to [0, 100].
    pub total: u32,
}

/// The populated record handed to the persistence collaborator after a
/// scoring run. Re-running analysis overwrites the scored fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub message_id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub raw_headers: String,
    pub header_analysis: HeaderAnalysis,
    pub attachments: Vec<AttachmentFinding>,
    pub urls: Vec<UrlFinding>,
    pub scores: ScoreSet,
    pub risk_level: RiskLevel,
    pub status: ReviewStatus,
    pub flagged: bool,
    /// Set when aggregation had to substitute zero for a missing sub-score.
    pub incomplete: bool,
    pub analyzed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn email_input_accepts_minimal_json() {
        let input: EmailInput = serde_json::from_str(
            r#"{"message_id":"m1","sender":"user@example.com"}"#,
        )
        .unwrap();
        assert_eq!(input.message_id, "m1");
        assert!(input.urls.is_empty());
        assert!(input.attachments.is_empty());
    }
}
