use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Outcome of the certificate probe for one domain. `valid` means the
/// handshake verified the chain, hostname and validity window against the
/// platform trust store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslInfo {
    pub valid: bool,
    pub issuer: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub error: Option<String>,
}

impl SslInfo {
    fn failure(error: String) -> Self {
        Self {
            valid: false,
            issuer: None,
            expires_at: None,
            days_remaining: None,
            error: Some(error),
        }
    }
}

pub struct SslChecker {
    connector: TlsConnector,
    timeout: std::time::Duration,
    use_mock: bool,
}

impl SslChecker {
    pub fn new(timeout_seconds: u64, use_mock: bool) -> Self {
        let mut root_store = RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            if let Err(e) = root_store.add(cert) {
                log::debug!("skipping unusable root certificate: {e}");
            }
        }
        if !certs.errors.is_empty() {
            log::warn!("some platform certificates could not be loaded: {:?}", certs.errors);
        }

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout: std::time::Duration::from_secs(timeout_seconds),
            use_mock,
        }
    }

    /// Probe port 443 of `domain` and validate its certificate chain.
    /// Never fails: every problem is recorded on the returned `SslInfo`.
    pub async fn check(&self, domain: &str) -> SslInfo {
        if self.use_mock {
            return Self::mock_info(domain);
        }

        let server_name = match ServerName::try_from(domain.to_string()) {
            Ok(name) => name,
            Err(e) => return SslInfo::failure(format!("invalid server name: {e}")),
        };

        let stream = match timeout(self.timeout, TcpStream::connect((domain, 443))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return SslInfo::failure(format!("connect failed: {e}")),
            Err(_) => return SslInfo::failure("connect timed out".to_string()),
        };

        match timeout(self.timeout, self.connector.connect(server_name, stream)).await {
            Ok(Ok(_tls)) => {
                log::debug!("certificate chain for {domain} verified");
                SslInfo {
                    valid: true,
                    issuer: None,
                    expires_at: None,
                    days_remaining: None,
                    error: None,
                }
            }
            Ok(Err(e)) => SslInfo::failure(format!("handshake failed: {e}")),
            Err(_) => SslInfo::failure("handshake timed out".to_string()),
        }
    }

    fn mock_info(domain: &str) -> SslInfo {
        if domain.starts_with("expired.") || domain.contains("badssl") {
            return SslInfo::failure("certificate has expired (mock)".to_string());
        }
        let expires_at = Utc::now() + Duration::days(90);
        SslInfo {
            valid: true,
            issuer: Some("Mock Trust Services".to_string()),
            expires_at: Some(expires_at),
            days_remaining: Some(90),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_valid_certificate() {
        let checker = SslChecker::new(5, true);
        let info = checker.check("example.com").await;
        assert!(info.valid);
        assert_eq!(info.days_remaining, Some(90));
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn test_mock_expired_certificate() {
        let checker = SslChecker::new(5, true);
        let info = checker.check("expired.example.com").await;
        assert!(!info.valid);
        assert!(info.error.as_deref().unwrap_or("").contains("expired"));
    }

    #[tokio::test]
    async fn test_invalid_server_name_is_recorded() {
        let checker = SslChecker::new(1, false);
        let info = checker.check("not a hostname").await;
        assert!(!info.valid);
        assert!(info.error.is_some());
    }
}
