use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vote counts from the reputation service for one domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReputationInfo {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub error: Option<String>,
}

impl ReputationInfo {
    fn unknown(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

pub struct ReputationChecker {
    client: Client,
    endpoint: String,
    api_key: String,
    use_mock: bool,
}

impl ReputationChecker {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout_seconds: u64,
        use_mock: bool,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("mailrisk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or_default(),
            use_mock,
        })
    }

    /// Query malicious/suspicious vote counts for a domain. Failures are
    /// recorded, never raised.
    pub async fn lookup(&self, domain: &str) -> ReputationInfo {
        if self.use_mock {
            return Self::mock_info(domain);
        }

        let url = format!("{}/domains/{domain}", self.endpoint);
        let response = match self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return ReputationInfo::unknown(e.to_string()),
        };

        if !response.status().is_success() {
            return ReputationInfo::unknown(format!(
                "reputation service returned {}",
                response.status()
            ));
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return ReputationInfo::unknown(format!("bad reputation payload: {e}")),
        };

        let stats = &body["data"]["attributes"]["last_analysis_stats"];
        ReputationInfo {
            malicious: stats["malicious"].as_u64().unwrap_or(0) as u32,
            suspicious: stats["suspicious"].as_u64().unwrap_or(0) as u32,
            harmless: stats["harmless"].as_u64().unwrap_or(0) as u32,
            error: None,
        }
    }

    fn mock_info(domain: &str) -> ReputationInfo {
        match domain {
            "malicious.test" => ReputationInfo {
                malicious: 7,
                suspicious: 2,
                harmless: 40,
                error: None,
            },
            "timeout.test" => {
                ReputationInfo::unknown("reputation lookup timed out (mock)".to_string())
            }
            _ => ReputationInfo {
                harmless: 60,
                ..ReputationInfo::default()
            },
        }
    }
}
