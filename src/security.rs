use crate::error::PreviewError;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

/// Configuration for URL validation
#[derive(Debug, Clone)]
pub struct UrlValidationConfig {
    /// Allowed URL schemes (default: ["http", "https"])
    pub allowed_schemes: HashSet<String>,
    /// Block private/local/link-local targets, including after DNS resolution (default: true)
    pub block_private_ips: bool,
    /// Block localhost names (default: true)
    pub block_localhost: bool,
    /// Domain blacklist
    pub blocked_domains: HashSet<String>,
}

impl Default for UrlValidationConfig {
    fn default() -> Self {
        let mut allowed_schemes = HashSet::new();
        allowed_schemes.insert("http".to_string());
        allowed_schemes.insert("https".to_string());

        Self {
            allowed_schemes,
            block_private_ips: true,
            block_localhost: true,
            blocked_domains: HashSet::new(),
        }
    }
}

impl UrlValidationConfig {
    /// Policy for hosts that deliberately fetch from their own network,
    /// such as test fixtures bound to loopback.
    pub fn permissive() -> Self {
        Self {
            block_private_ips: false,
            block_localhost: false,
            ..Self::default()
        }
    }
}

/// Validates fetch targets against the SSRF policy.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    config: UrlValidationConfig,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new(UrlValidationConfig::default())
    }
}

impl UrlValidator {
    pub fn new(config: UrlValidationConfig) -> Self {
        Self { config }
    }

    /// Parses a URL string and applies the static checks.
    pub fn validate(&self, url_str: &str) -> Result<Url, PreviewError> {
        let url = Url::parse(url_str.trim())?;
        self.validate_url(&url)?;
        Ok(url)
    }

    /// Static checks only: scheme, host presence, domain lists, literal addresses.
    pub fn validate_url(&self, url: &Url) -> Result<(), PreviewError> {
        if !self.config.allowed_schemes.contains(url.scheme()) {
            return Err(PreviewError::InvalidUrl(format!(
                "scheme '{}' is not allowed",
                url.scheme()
            )));
        }

        let host = url
            .host()
            .ok_or_else(|| PreviewError::InvalidUrl("No host in URL".to_string()))?;

        match host {
            Host::Domain(domain) => {
                let domain = domain.trim_end_matches('.');
                if self.is_domain_blocked(domain) {
                    return Err(PreviewError::Blocked(domain.to_string()));
                }
                if self.config.block_localhost && is_localhost(domain) {
                    return Err(PreviewError::Blocked(domain.to_string()));
                }
            }
            Host::Ipv4(ip) => self.check_ip(IpAddr::V4(ip))?,
            Host::Ipv6(ip) => self.check_ip(IpAddr::V6(ip))?,
        }

        Ok(())
    }

    fn check_ip(&self, ip: IpAddr) -> Result<(), PreviewError> {
        if (self.config.block_localhost && ip.is_loopback())
            || (self.config.block_private_ips && is_private_ip(&ip))
        {
            return Err(PreviewError::Blocked(ip.to_string()));
        }
        Ok(())
    }

    fn is_domain_blocked(&self, host: &str) -> bool {
        self.config
            .blocked_domains
            .iter()
            .any(|blocked| host == blocked || host.ends_with(&format!(".{blocked}")))
    }
}

/// Name resolution for the fetch client. The addresses it hands out are the
/// ones connected to, so the internal-address check cannot be raced by a
/// second lookup. Static overrides are subject to the same check.
#[derive(Debug, Clone)]
pub struct GuardedResolver {
    overrides: Arc<HashMap<String, Vec<SocketAddr>>>,
    /// Hosts resolved without the check, e.g. a configured proxy.
    trusted: Arc<HashSet<String>>,
    block_private_ips: bool,
    block_localhost: bool,
}

impl GuardedResolver {
    pub fn new(config: &UrlValidationConfig, overrides: &[(String, SocketAddr)]) -> Self {
        let mut table: HashMap<String, Vec<SocketAddr>> = HashMap::new();
        for (domain, addr) in overrides {
            table
                .entry(domain.trim_end_matches('.').to_ascii_lowercase())
                .or_default()
                .push(*addr);
        }
        Self {
            overrides: Arc::new(table),
            trusted: Arc::new(HashSet::new()),
            block_private_ips: config.block_private_ips,
            block_localhost: config.block_localhost,
        }
    }

    pub fn trusting(mut self, host: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.trusted).insert(host.into().to_ascii_lowercase());
        self
    }

    /// Resolves `host`, failing with [`PreviewError::Blocked`] if any
    /// address is internal under the policy.
    pub async fn lookup(&self, host: &str) -> Result<Vec<SocketAddr>, PreviewError> {
        let key = host.trim_end_matches('.').to_ascii_lowercase();
        let addrs: Vec<SocketAddr> = match self.overrides.get(&key) {
            Some(addrs) => addrs.clone(),
            None => tokio::net::lookup_host((host, 0))
                .await
                .map_err(|e| PreviewError::Network(format!("DNS lookup for {host} failed: {e}")))?
                .collect(),
        };

        if addrs.is_empty() {
            return Err(PreviewError::Network(format!("{host} has no addresses")));
        }
        if self.trusted.contains(&key) {
            return Ok(addrs);
        }
        if let Some(addr) = addrs.iter().find(|addr| self.is_blocked(&addr.ip())) {
            debug!(host = %host, ip = %addr.ip(), "Host resolves to internal address");
            return Err(PreviewError::Blocked(format!("{host} -> {}", addr.ip())));
        }
        Ok(addrs)
    }

    fn is_blocked(&self, ip: &IpAddr) -> bool {
        (self.block_localhost && ip.is_loopback())
            || (self.block_private_ips && is_private_ip(ip))
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let addrs = resolver.lookup(name.as_str()).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

fn is_localhost(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost")
}

pub(crate) fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_ipv4_internal(ipv4),
        IpAddr::V6(ipv6) => {
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_ipv4_internal(&mapped);
            }
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6.is_multicast()
                || is_ipv6_link_local(ipv6)
                || is_ipv6_unique_local(ipv6)
        }
    }
}

fn is_ipv4_internal(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();

    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 0.0.0.0/8
        || octets[0] == 0
        // 100.64.0.0/10 (Carrier-grade NAT)
        || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
        // 224.0.0.0/4 (Multicast) and 240.0.0.0/4 (Reserved)
        || octets[0] >= 224
}

fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    // fe80::/10
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

fn is_ipv6_unique_local(ip: &Ipv6Addr) -> bool {
    // fc00::/7
    (ip.segments()[0] & 0xfe00) == 0xfc00
}
