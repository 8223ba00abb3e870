use crate::config::AggregationWeights;
use crate::record::{RiskLevel, ScoreSet};

/// The one canonical score-to-level table. Every level in the system,
/// per-URL and per-email, comes from here.
pub fn risk_level_for(total: u32) -> RiskLevel {
    if total < 30 {
        RiskLevel::Low
    } else if total < 50 {
        RiskLevel::Medium
    } else if total < 80 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub scores: ScoreSet,
    pub risk_level: RiskLevel,
    pub flagged: bool,
    /// A missing sub-score was substituted with zero.
    pub incomplete: bool,
}

/// Pure fold of all sub-scores into the final total and level. No I/O,
/// re-runnable: identical inputs always produce identical output.
pub struct AggregationEngine {
    weights: AggregationWeights,
    flag_threshold: RiskLevel,
}

impl AggregationEngine {
    pub fn new(weights: AggregationWeights, flag_threshold: RiskLevel) -> Self {
        Self {
            weights,
            flag_threshold,
        }
    }

    /// Combine sub-scores. Header/text/metadata sum directly; attachment
    /// and URL scores fold by maximum (one malicious finding already
    /// justifies escalation) scaled by their contribution weight.
    pub fn aggregate(
        &self,
        header: Option<u32>,
        text: Option<u32>,
        metadata: Option<u32>,
        attachment_scores: &[u32],
        url_scores: &[u32],
    ) -> Aggregate {
        let incomplete = header.is_none() || text.is_none() || metadata.is_none();

        let header = header.unwrap_or(0);
        let text = text.unwrap_or(0);
        let metadata = metadata.unwrap_or(0);

        let worst_attachment = attachment_scores.iter().copied().max().unwrap_or(0);
        let worst_url = url_scores.iter().copied().max().unwrap_or(0);

        let attachment_contribution =
            worst_attachment * self.weights.attachment_weight_pct / 100;
        let url_contribution = worst_url * self.weights.url_weight_pct / 100;

        let total =
            (header + text + metadata + attachment_contribution + url_contribution).min(100);

        let risk_level = risk_level_for(total);

        Aggregate {
            scores: ScoreSet {
                header,
                text,
                metadata,
                attachments: worst_attachment,
                urls: worst_url,
                total,
            },
            risk_level,
            flagged: risk_level >= self.flag_threshold,
            incomplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AggregationEngine {
        AggregationEngine::new(AggregationWeights::default(), RiskLevel::High)
    }

    #[test]
    fn test_threshold_table() {
        assert_eq!(risk_level_for(0), RiskLevel::Low);
        assert_eq!(risk_level_for(29), RiskLevel::Low);
        assert_eq!(risk_level_for(30), RiskLevel::Medium);
        assert_eq!(risk_level_for(49), RiskLevel::Medium);
        assert_eq!(risk_level_for(50), RiskLevel::High);
        assert_eq!(risk_level_for(79), RiskLevel::High);
        assert_eq!(risk_level_for(80), RiskLevel::Critical);
        assert_eq!(risk_level_for(100), RiskLevel::Critical);
    }

    #[test]
    fn test_level_is_monotonic_in_total() {
        let mut previous = risk_level_for(0);
        for total in 1..=100 {
            let level = risk_level_for(total);
            assert!(level >= previous, "level regressed at total={total}");
            previous = level;
        }
    }

    #[test]
    fn test_total_is_clamped() {
        let result = engine().aggregate(Some(60), Some(60), Some(60), &[100], &[100]);
        assert_eq!(result.scores.total, 100);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_worst_finding_dominates_fold() {
        let result = engine().aggregate(Some(0), Some(0), Some(0), &[10, 80, 20], &[5, 40]);
        assert_eq!(result.scores.attachments, 80);
        assert_eq!(result.scores.urls, 40);
        // 80 * 50% + 40 * 50%
        assert_eq!(result.scores.total, 60);
    }

    #[test]
    fn test_idempotent() {
        let a = engine().aggregate(Some(10), Some(45), Some(15), &[25], &[15]);
        let b = engine().aggregate(Some(10), Some(45), Some(15), &[25], &[15]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_sub_scores_substitute_zero_and_mark_incomplete() {
        let result = engine().aggregate(None, Some(20), Some(10), &[], &[]);
        assert!(result.incomplete);
        assert_eq!(result.scores.header, 0);
        assert_eq!(result.scores.total, 30);

        let complete = engine().aggregate(Some(0), Some(20), Some(10), &[], &[]);
        assert!(!complete.incomplete);
    }

    #[test]
    fn test_flagged_at_threshold() {
        let below = engine().aggregate(Some(10), Some(20), Some(10), &[], &[]);
        assert_eq!(below.risk_level, RiskLevel::Medium);
        assert!(!below.flagged);

        let at = engine().aggregate(Some(20), Some(20), Some(10), &[], &[]);
        assert_eq!(at.risk_level, RiskLevel::High);
        assert!(at.flagged);

        let critical = engine().aggregate(Some(40), Some(30), Some(15), &[], &[]);
        assert_eq!(critical.risk_level, RiskLevel::Critical);
        assert!(critical.flagged);
    }

    #[test]
    fn test_empty_findings_contribute_nothing() {
        let result = engine().aggregate(Some(5), Some(5), Some(5), &[], &[]);
        assert_eq!(result.scores.attachments, 0);
        assert_eq!(result.scores.urls, 0);
        assert_eq!(result.scores.total, 15);
        assert!(!result.incomplete);
    }
}
