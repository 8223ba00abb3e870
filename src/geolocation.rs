use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// ASN -> datacenter provider mapping with sample CIDR blocks. Exact match
/// on the AS number selects the provider; a CIDR hit narrows the label.
const DATACENTER_MAPPINGS: [(u32, &str, &[&str]); 6] = [
    (
        16509,
        "AWS",
        &["3.0.0.0/8", "13.32.0.0/12", "13.112.0.0/14", "18.32.0.0/11", "52.0.0.0/8", "54.0.0.0/8"],
    ),
    (
        15169,
        "Google Cloud",
        &["34.64.0.0/10", "34.128.0.0/10", "35.184.0.0/13", "35.192.0.0/14", "35.196.0.0/15", "35.198.0.0/16"],
    ),
    (
        8075,
        "Microsoft Azure",
        &["13.64.0.0/11", "20.33.0.0/16", "20.34.0.0/15", "20.36.0.0/14", "20.40.0.0/13"],
    ),
    (
        13335,
        "Cloudflare",
        &["1.0.0.0/24", "1.1.1.0/24", "104.16.0.0/12", "162.158.0.0/15", "172.64.0.0/13"],
    ),
    (
        14061,
        "DigitalOcean",
        &["45.55.0.0/16", "67.205.0.0/17", "104.131.0.0/16", "128.199.0.0/16", "138.68.0.0/16", "159.65.0.0/16"],
    ),
    (
        63949,
        "Linode",
        &["23.92.16.0/20", "72.14.176.0/20", "97.107.128.0/20", "139.162.0.0/16", "173.230.128.0/20", "178.79.128.0/18"],
    ),
];

/// Commercial VPN providers recognizable from the org string.
const VPN_PROVIDERS: [&str; 15] = [
    "nordvpn",
    "expressvpn",
    "privatevpn",
    "protonvpn",
    "ipvanish",
    "surfshark",
    "purevpn",
    "vyprvpn",
    "torguard",
    "mullvad",
    "privateinternetaccess",
    "cyberghost",
    "hidemyass",
    "tunnelbear",
    "windscribe",
];

/// ASNs operated by hosting providers that commonly front proxies.
const PROXY_ASNS: [u32; 10] = [14061, 16509, 14618, 15169, 8075, 36351, 13335, 46606, 174, 3356];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VpnConfidence {
    High,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnVerdict {
    pub is_vpn_or_proxy: bool,
    pub confidence: VpnConfidence,
    pub provider: Option<String>,
}

impl Default for VpnVerdict {
    fn default() -> Self {
        Self {
            is_vpn_or_proxy: false,
            confidence: VpnConfidence::Unknown,
            provider: None,
        }
    }
}

/// Geolocation and infrastructure facts for one IP. Cached for 30 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRecord {
    pub ip: IpAddr,
    pub asn: Option<u32>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub datacenter: Option<String>,
    pub vpn: VpnVerdict,
    pub hostname: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl GeoRecord {
    fn unknown(ip: IpAddr, error: String) -> Self {
        Self {
            ip,
            asn: None,
            isp: None,
            org: None,
            city: None,
            region: None,
            country: None,
            country_code: None,
            latitude: None,
            longitude: None,
            timezone: None,
            datacenter: None,
            vpn: VpnVerdict::default(),
            hostname: None,
            fetched_at: Utc::now(),
            error: Some(error),
        }
    }
}

pub struct GeoLocator {
    resolver: Option<TokioAsyncResolver>,
    client: Client,
    endpoint: String,
    use_mock: bool,
}

impl GeoLocator {
    pub fn new(endpoint: String, timeout_seconds: u64, use_mock: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("mailrisk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let resolver = if use_mock {
            None
        } else {
            Some(TokioAsyncResolver::tokio_from_system_conf()?)
        };

        Ok(Self {
            resolver,
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            use_mock,
        })
    }

    /// Resolve A records for a domain.
    pub async fn resolve_ips(&self, domain: &str) -> Result<Vec<IpAddr>> {
        if self.use_mock {
            return Ok(Self::mock_ips(domain));
        }

        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| anyhow!("resolver not configured"))?;

        let lookup = resolver.lookup_ip(domain).await?;
        Ok(lookup.iter().filter(|ip| ip.is_ipv4()).collect())
    }

    /// Fetch geolocation, datacenter and VPN classification for one IP.
    /// Uncached; callers go through the pipeline's `LookupCache`.
    pub async fn lookup(&self, ip: IpAddr) -> GeoRecord {
        if self.use_mock {
            return Self::mock_record(ip);
        }

        let url = format!("{}/{ip}", self.endpoint);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return GeoRecord::unknown(ip, e.to_string()),
        };

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return GeoRecord::unknown(ip, format!("bad geolocation payload: {e}")),
        };

        if body["success"].as_bool() == Some(false) {
            let message = body["message"].as_str().unwrap_or("lookup failed");
            return GeoRecord::unknown(ip, message.to_string());
        }

        let connection = &body["connection"];
        let asn = connection["asn"].as_u64().map(|n| n as u32);
        let isp = connection["isp"].as_str().map(|s| s.to_string());
        let org = connection["org"].as_str().map(|s| s.to_string());

        let timezone = body["timezone"]["id"]
            .as_str()
            .or_else(|| body["timezone"].as_str())
            .map(|s| s.to_string());

        let hostname = self.reverse_dns(ip).await;

        GeoRecord {
            ip,
            asn,
            datacenter: datacenter_label(ip, asn),
            vpn: classify_vpn(org.as_deref(), asn),
            isp,
            org,
            city: body["city"].as_str().map(|s| s.to_string()),
            region: body["region"].as_str().map(|s| s.to_string()),
            country: body["country"].as_str().map(|s| s.to_string()),
            country_code: body["country_code"].as_str().map(|s| s.to_string()),
            latitude: body["latitude"].as_f64(),
            longitude: body["longitude"].as_f64(),
            timezone,
            hostname,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    async fn reverse_dns(&self, ip: IpAddr) -> Option<String> {
        let resolver = self.resolver.as_ref()?;
        match resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup.iter().next().map(|ptr| ptr.0.to_utf8()),
            Err(e) => {
                log::debug!("reverse DNS failed for {ip}: {e}");
                None
            }
        }
    }

    fn mock_ips(domain: &str) -> Vec<IpAddr> {
        match domain {
            "aws-hosted.test" => vec![IpAddr::V4(Ipv4Addr::new(52, 4, 10, 2))],
            "vpn-hosted.test" => vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 77))],
            _ => vec![IpAddr::V4(Ipv4Addr::new(198, 51, 100, 25))],
        }
    }

    fn mock_record(ip: IpAddr) -> GeoRecord {
        let mut record = GeoRecord {
            ip,
            asn: Some(64501),
            isp: Some("Example Carrier".to_string()),
            org: Some("Example Carrier LLC".to_string()),
            city: Some("Springfield".to_string()),
            region: Some("Oregon".to_string()),
            country: Some("United States".to_string()),
            country_code: Some("US".to_string()),
            latitude: Some(44.05),
            longitude: Some(-123.09),
            timezone: Some("America/Los_Angeles".to_string()),
            datacenter: None,
            vpn: VpnVerdict::default(),
            hostname: None,
            fetched_at: Utc::now(),
            error: None,
        };

        match ip {
            IpAddr::V4(v4) if v4.octets()[0] == 52 => {
                record.asn = Some(16509);
                record.org = Some("Amazon.com, Inc.".to_string());
                record.isp = Some("Amazon.com, Inc.".to_string());
                record.datacenter = datacenter_label(ip, record.asn);
                record.vpn = classify_vpn(record.org.as_deref(), record.asn);
            }
            IpAddr::V4(v4) if v4.octets() == [192, 0, 2, 77] => {
                record.asn = Some(64502);
                record.org = Some("NordVPN S.A.".to_string());
                record.vpn = classify_vpn(record.org.as_deref(), record.asn);
            }
            _ => {}
        }

        record
    }
}

/// Datacenter label from the static ASN table; CIDR containment narrows it.
pub fn datacenter_label(ip: IpAddr, asn: Option<u32>) -> Option<String> {
    let asn = asn?;
    let (_, name, ranges) = DATACENTER_MAPPINGS.iter().find(|(a, _, _)| *a == asn)?;

    if let IpAddr::V4(v4) = ip {
        for &cidr in ranges.iter() {
            if ipv4_in_cidr(v4, cidr) {
                return Some(format!("{name} ({cidr})"));
            }
        }
    }

    Some(name.to_string())
}

/// VPN/proxy verdict from provider-name patterns and proxy-heavy ASNs.
pub fn classify_vpn(org: Option<&str>, asn: Option<u32>) -> VpnVerdict {
    let org_lower = org.map(|o| o.to_lowercase()).unwrap_or_default();

    if let Some(provider) = VPN_PROVIDERS.iter().find(|p| org_lower.contains(*p)) {
        return VpnVerdict {
            is_vpn_or_proxy: true,
            confidence: VpnConfidence::High,
            provider: Some(provider.to_string()),
        };
    }

    if let Some(asn) = asn {
        if PROXY_ASNS.contains(&asn) {
            return VpnVerdict {
                is_vpn_or_proxy: true,
                confidence: VpnConfidence::Low,
                provider: org.map(|o| o.to_string()),
            };
        }
    }

    VpnVerdict {
        is_vpn_or_proxy: false,
        confidence: if org.is_some() {
            VpnConfidence::Low
        } else {
            VpnConfidence::Unknown
        },
        provider: None,
    }
}

fn ipv4_in_cidr(ip: Ipv4Addr, cidr: &str) -> bool {
    let Some((network, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(network) = network.parse::<Ipv4Addr>() else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    if prefix > 32 {
        return false;
    }

    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}
