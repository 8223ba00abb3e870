use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// One observed redirect hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectHop {
    pub url: String,
    pub status: u16,
    pub observed_at: DateTime<Utc>,
}

pub struct UrlResolver {
    client: Client,
    max_redirects: usize,
}

impl UrlResolver {
    pub fn new(timeout_seconds: u64, max_redirects: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("mailrisk/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            // Redirect chains through bad-cert hosts are exactly what we
            // want to observe; the certificate itself is judged separately.
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            max_redirects,
        })
    }

    /// Walk the redirect chain, recording every hop with its status code.
    /// A request failure ends the walk; the hops seen so far are returned
    /// together with the error text.
    pub async fn follow_redirects(&self, url: &str) -> (Vec<RedirectHop>, Option<String>) {
        let mut chain = Vec::new();
        let mut current_url = url.to_string();

        for _ in 0..=self.max_redirects {
            let response = match self.client.head(&current_url).send().await {
                Ok(response) => response,
                Err(e) => return (chain, Some(e.to_string())),
            };

            let status = response.status().as_u16();
            chain.push(RedirectHop {
                url: current_url.clone(),
                status,
                observed_at: Utc::now(),
            });

            if !response.status().is_redirection() {
                break;
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            match location {
                Some(location) => match absolutize(&current_url, &location) {
                    Ok(next) => current_url = next,
                    Err(e) => return (chain, Some(e.to_string())),
                },
                None => break,
            }
        }

        (chain, None)
    }

    /// Resolve a shortened URL to its final destination.
    pub async fn expand(&self, url: &str) -> Result<String> {
        let mut current_url = url.to_string();
        let mut redirect_count = 0;

        while redirect_count < self.max_redirects {
            let response = self.client.head(&current_url).send().await?;

            if !response.status().is_redirection() {
                break;
            }
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| anyhow!("redirect without location header"))?
                .to_string();

            current_url = absolutize(&current_url, &location)?;
            redirect_count += 1;
        }

        Ok(current_url)
    }

    /// Check if a URL's host is a known shortener.
    pub fn is_shortener(domain: &str) -> bool {
        const SHORTENERS: [&str; 18] = [
            "bit.ly",
            "tinyurl.com",
            "t.co",
            "goo.gl",
            "ow.ly",
            "is.gd",
            "v.gd",
            "buff.ly",
            "rebrand.ly",
            "cutt.ly",
            "tiny.cc",
            "bl.ink",
            "shorturl.at",
            "rb.gy",
            "tr.im",
            "x.co",
            "cli.gs",
            "u.to",
        ];

        let domain = domain.to_lowercase();
        SHORTENERS.iter().any(|s| domain == *s)
    }
}

/// Handle relative Location headers against the current URL.
fn absolutize(base: &str, location: &str) -> Result<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }
    let base = Url::parse(base)?;
    Ok(base.join(location)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_shortener() {
        assert!(UrlResolver::is_shortener("bit.ly"));
        assert!(UrlResolver::is_shortener("TinyURL.com"));
        assert!(!UrlResolver::is_shortener("google.com"));
        assert!(!UrlResolver::is_shortener("notbit.ly.example.com"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://a.example.com/x", "https://b.example.com/y").unwrap(),
            "https://b.example.com/y"
        );
        assert_eq!(
            absolutize("https://a.example.com/x/y", "/login").unwrap(),
            "https://a.example.com/login"
        );
        assert!(absolutize("not a url", "/login").is_err());
    }
}
