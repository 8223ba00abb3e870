use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ContentWeights;

lazy_static! {
    static ref RE_HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref RE_URGENCY: Regex = Regex::new(
        r"urgent|immediate|immediately|alert|warning|attention|act now|limited time|expire|deadline"
    )
    .unwrap();
    static ref RE_FINANCIAL: Regex =
        Regex::new(r"bank|account|credit card|payment|paypal|transaction").unwrap();
    static ref RE_CREDENTIAL: Regex = Regex::new(
        r"click here|login now|verify your|update your|password|credentials|social security|ssn"
    )
    .unwrap();
    static ref RE_SUBJECT_SENSATIONAL: Regex =
        Regex::new(r"urgent|alert|verify|warning|important|suspended").unwrap();
}

/// Tokens that show up in phishing copy often enough to be a signal on
/// their own.
const MISSPELLING_TOKENS: [&str; 12] = [
    "verifcation",
    "verfiy",
    "accaunt",
    "acount",
    "informtion",
    "infromation",
    "securty",
    "securiti",
    "verfy",
    "immediatly",
    "urjent",
    "urgant",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub indicators: Vec<String>,
    pub text_score: u32,
    pub metadata_score: u32,
}

/// Lexical heuristics over subject and body. Pure and infallible: every
/// detector is an independent boolean with a fixed weight.
pub struct ContentAnalyzer {
    weights: ContentWeights,
}

impl ContentAnalyzer {
    pub fn new(weights: ContentWeights) -> Self {
        Self { weights }
    }

    pub fn analyze(&self, subject: &str, body: &str) -> ContentAnalysis {
        let text = strip_markup(body).to_lowercase();
        let subject_lower = subject.to_lowercase();

        let mut indicators = Vec::new();
        let mut text_score = 0u32;
        let mut metadata_score = 0u32;

        if RE_URGENCY.is_match(&text) {
            indicators.push("urgent or threatening language".to_string());
            text_score += self.weights.urgency;
        }
        if RE_FINANCIAL.is_match(&text) {
            indicators.push("financial terms".to_string());
            text_score += self.weights.financial_terms;
        }
        if RE_CREDENTIAL.is_match(&text) {
            indicators.push("credential or action request".to_string());
            text_score += self.weights.credential_request;
        }
        if MISSPELLING_TOKENS.iter().any(|t| text.contains(t)) {
            indicators.push("common phishing misspellings".to_string());
            text_score += self.weights.misspellings;
        }
        if RE_SUBJECT_SENSATIONAL.is_match(&subject_lower) {
            indicators.push("sensational subject line".to_string());
            metadata_score += self.weights.subject_sensational;
        }

        ContentAnalysis {
            indicators,
            text_score,
            metadata_score,
        }
    }
}

fn strip_markup(body: &str) -> String {
    RE_HTML_TAG.replace_all(body, " ").to_string()
}
