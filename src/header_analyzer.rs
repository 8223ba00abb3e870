use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::HeaderWeights;
use crate::domain_utils::DomainUtils;

lazy_static! {
    static ref RE_FROM_HOST: Regex = Regex::new(r"(?i)from\s+([^\s()\[\]]+)").unwrap();
    static ref RE_BY_HOST: Regex = Regex::new(r"(?i)by\s+([^\s()\[\]]+)").unwrap();
    static ref RE_BRACKET_IP: Regex =
        Regex::new(r"[\[(](\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})[\])]").unwrap();
    static ref RE_ANY_IP: Regex = Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").unwrap();
}

/// Relay host fragments that bulk/spam infrastructure tends to use.
const BULK_RELAY_KEYWORDS: [&str; 3] = ["spam-relay", "bulk-mail", "mass-mailer"];

const SENSITIVE_SENDER_KEYWORDS: [&str; 2] = ["security", "account"];
const NOREPLY_SENDER_KEYWORDS: [&str; 2] = ["noreply", "no-reply"];

const MAX_EXPECTED_HOPS: usize = 15;

/// One mail-relay traversal recovered from a Received header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hop {
    pub from: Option<String>,
    pub by: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderAnalysis {
    /// Hops in chronological order (closest-to-origin first).
    pub hops: Vec<Hop>,
    /// IP embedded in the originating hop, when one is present.
    pub origin_ip: Option<String>,
    pub anomalies: Vec<String>,
    /// Raw block had no parseable header lines; score is zero by fiat.
    pub insufficient_data: bool,
    pub score: u32,
}

pub struct HeaderAnalyzer {
    weights: HeaderWeights,
}

impl HeaderAnalyzer {
    pub fn new(weights: HeaderWeights) -> Self {
        Self { weights }
    }

    /// Analyze the raw header block for provenance anomalies. Never fails:
    /// malformed input yields a zero score with `insufficient_data` set.
    pub fn analyze(&self, sender: &str, raw_headers: &str) -> HeaderAnalysis {
        let lines = unfold_header_lines(raw_headers);

        if !lines.iter().any(|l| l.contains(':')) {
            log::debug!("header block has no parseable lines, skipping provenance scoring");
            return HeaderAnalysis {
                insufficient_data: true,
                ..HeaderAnalysis::default()
            };
        }

        // Mail systems prepend the newest Received header, so the raw
        // order is newest-first; reverse for true chronological order.
        let hops: Vec<Hop> = lines
            .iter()
            .filter(|l| l.to_lowercase().starts_with("received:"))
            .rev()
            .map(|l| parse_hop(l))
            .collect();

        let origin_ip = hops
            .first()
            .and_then(|h| h.ip.clone())
            .or_else(|| hops.iter().find_map(|h| h.ip.clone()));

        let mut anomalies = Vec::new();
        let mut score = 0u32;

        if hops.len() > MAX_EXPECTED_HOPS {
            anomalies.push(format!("excessive relay hops ({})", hops.len()));
            score += self.weights.excessive_hops;
        }

        if let Some(host) = hops.iter().find_map(|h| {
            h.from.as_ref().filter(|f| {
                BULK_RELAY_KEYWORDS
                    .iter()
                    .any(|kw| f.to_lowercase().contains(kw))
            })
        }) {
            anomalies.push(format!("known relay ({host})"));
            score += self.weights.known_relay;
        }

        let sender_domain = DomainUtils::extract_email_domain(sender)
            .or_else(|| find_header_value(&lines, "from").and_then(|v| DomainUtils::extract_email_domain(&v)));

        if let (Some(sender_dom), Some(return_path)) = (
            sender_domain.as_deref(),
            find_header_value(&lines, "return-path"),
        ) {
            if let Some(rp_dom) = DomainUtils::extract_email_domain(&return_path) {
                if domains_mismatch(sender_dom, &rp_dom) {
                    anomalies.push("return-path mismatch".to_string());
                    score += self.weights.return_path_mismatch;
                }
            }
        }

        if let (Some(sender_dom), Some(reply_to)) = (
            sender_domain.as_deref(),
            find_header_value(&lines, "reply-to"),
        ) {
            if let Some(rt_dom) = DomainUtils::extract_email_domain(&reply_to) {
                if domains_mismatch(sender_dom, &rt_dom) {
                    anomalies.push("reply-to mismatch".to_string());
                    score += self.weights.reply_to_mismatch;
                }
            }
        }

        if let Some(local) = DomainUtils::extract_local_part(sender) {
            if NOREPLY_SENDER_KEYWORDS.iter().any(|kw| local.contains(kw)) {
                anomalies.push("noreply sender".to_string());
                score += self.weights.noreply_sender;
            }
            if SENSITIVE_SENDER_KEYWORDS.iter().any(|kw| local.contains(kw)) {
                anomalies.push("sensitive sender keyword".to_string());
                score += self.weights.sensitive_sender;
            }
        }

        HeaderAnalysis {
            hops,
            origin_ip,
            anomalies,
            insufficient_data: false,
            score,
        }
    }
}

/// Join folded continuation lines (leading whitespace) back onto their
/// header line.
fn unfold_header_lines(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        if !line.trim().is_empty() {
            lines.push(line.trim_end().to_string());
        }
    }
    lines
}

fn parse_hop(received_line: &str) -> Hop {
    let from = RE_FROM_HOST
        .captures(received_line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let by = RE_BY_HOST
        .captures(received_line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let ip = RE_BRACKET_IP
        .captures(received_line)
        .or_else(|| RE_ANY_IP.captures(received_line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Hop { from, by, ip }
}

fn find_header_value(lines: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}:");
    lines
        .iter()
        .find(|l| l.to_lowercase().starts_with(&prefix))
        .map(|l| l[prefix.len()..].trim().to_string())
}

/// Case-insensitive suffix compare: subdomains of one another do not count
/// as a mismatch.
fn domains_mismatch(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    !(a == b
        || a.ends_with(&format!(".{b}"))
        || b.ends_with(&format!(".{a}")))
}
