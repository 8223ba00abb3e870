/// Minimal domain hierarchy utilities shared by the analyzers.
pub struct DomainUtils;

impl DomainUtils {
    /// Extract the domain part of an email address, tolerating display
    /// names and trailing SMTP artifacts ("Name <user@dom>", "user@dom>,
    /// body=8bitmime", ...).
    pub fn extract_email_domain(address: &str) -> Option<String> {
        let address = match (address.find('<'), address.find('>')) {
            (Some(start), Some(end)) if start < end => &address[start + 1..end],
            _ => address,
        };

        let at_pos = address.rfind('@')?;
        if at_pos == 0 {
            return None;
        }

        let domain = address[at_pos + 1..]
            .split_whitespace()
            .next()?
            .split('>')
            .next()?
            .split(',')
            .next()?
            .split(';')
            .next()?
            .trim();

        if domain.contains('.')
            && !domain.is_empty()
            && domain.len() < 255
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            Some(domain.to_lowercase())
        } else {
            None
        }
    }

    /// Local part of an email address, lowercased.
    pub fn extract_local_part(address: &str) -> Option<String> {
        let address = match (address.find('<'), address.find('>')) {
            (Some(start), Some(end)) if start < end => &address[start + 1..end],
            _ => address,
        };
        let at_pos = address.rfind('@')?;
        if at_pos == 0 {
            return None;
        }
        Some(address[..at_pos].to_lowercase())
    }

    /// Canonicalize domain (remove www prefix).
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.to_lowercase();
        if let Some(stripped) = domain_lower.strip_prefix("www.") {
            stripped.to_string()
        } else {
            domain_lower
        }
    }

    /// Registrable root domain, e.g. "email.nationalgeographic.com" ->
    /// "nationalgeographic.com", honoring common two-part TLDs.
    pub fn root_domain(domain: &str) -> String {
        let parts: Vec<&str> = domain.split('.').collect();

        if parts.len() >= 2 {
            let root = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);

            if parts.len() >= 3 {
                let common_two_part_tlds = [
                    "co.uk", "com.au", "co.jp", "co.kr", "com.br", "co.za", "com.mx", "co.in",
                    "com.sg", "co.nz", "com.ar", "co.il", "org.uk", "net.au", "gov.uk", "ac.uk",
                    "edu.au",
                ];

                if common_two_part_tlds.contains(&root.as_str()) {
                    return format!(
                        "{}.{}.{}",
                        parts[parts.len() - 3],
                        parts[parts.len() - 2],
                        parts[parts.len() - 1]
                    );
                }
            }

            root
        } else {
            domain.to_string()
        }
    }

    /// Labels in front of the registrable domain ("a.b.example.com" -> 2).
    pub fn subdomain_count(domain: &str) -> usize {
        let labels = domain.split('.').filter(|l| !l.is_empty()).count();
        labels.saturating_sub(2)
    }

    /// Last label of the domain, lowercased.
    pub fn tld(domain: &str) -> Option<String> {
        domain
            .rsplit('.')
            .next()
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
    }

    /// Check if domain matches any in list (with hierarchy support).
    pub fn matches_domain_list(domain: &str, domain_list: &[&str]) -> bool {
        let domain_lower = domain.to_lowercase();

        for pattern in domain_list {
            let pattern_lower = pattern.to_lowercase();

            if domain_lower == pattern_lower {
                return true;
            }

            // Subdomain match (domain ends with .pattern)
            if domain_lower.ends_with(&format!(".{pattern_lower}")) {
                return true;
            }
        }

        false
    }

    /// Bare IPv4 literal host, e.g. "203.0.113.5".
    pub fn is_ipv4_literal(host: &str) -> bool {
        host.parse::<std::net::Ipv4Addr>().is_ok()
    }
}
