use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PoolError, Result};

/// Latency assumed for a freshly discovered proxy, in seconds.
///
/// Small on purpose so that new proxies get sampled early.
pub const INITIAL_LATENCY: f64 = 1e-3;

/// Keeps the failure rate finite when a record has no history yet.
const FAILRATE_EPSILON: f64 = 1e-7;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Endpoint of an upstream proxy, e.g. `socks5://1.1.1.1:5000`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
}

impl ProxyAddress {
    pub fn new(protocol: ProxyProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    /// Parse a `scheme://host:port` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let url = Url::parse(raw)?;

        let protocol = ProxyProtocol::from_str(url.scheme())
            .ok_or_else(|| PoolError::UnsupportedProtocol(url.scheme().to_string()))?;

        if url.fragment().is_some() || url.query().is_some() {
            return Err(PoolError::InvalidProxyAddress(format!(
                "{} must not include query/fragment",
                raw
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PoolError::InvalidProxyAddress(format!("{} has no host", raw)))?;

        // Url drops ports equal to the scheme default, so ask for the known default too.
        let port = url
            .port_or_known_default()
            .ok_or_else(|| PoolError::InvalidProxyAddress(format!("{} has no port", raw)))?;

        Ok(Self::new(protocol, host, port))
    }

    /// Parse an address, accepting a bare `host:port` with the given scheme.
    pub fn parse_with_default(raw: &str, default: ProxyProtocol) -> Result<Self> {
        let raw = raw.trim();
        if raw.contains("://") {
            Self::parse(raw)
        } else {
            Self::parse(&format!("{}://{}", default, raw))
        }
    }

    /// URL handed to the HTTP client.
    ///
    /// HTTP proxies are assumed to also handle HTTPS via CONNECT, so both
    /// http and https proxies are addressed with the plain http scheme.
    pub fn client_url(&self) -> String {
        let scheme = match self.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => "http",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl std::fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl std::str::FromStr for ProxyAddress {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A proxy combined with its observed health.
///
/// Mutable fields are only touched while the owning pool's lock is held.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub address: ProxyAddress,
    /// Most recent round-trip time in seconds
    pub latency: f64,
    /// Normalized sampling weight from the last sampling pass
    pub weight: f64,
    pub failure_count: u64,
    pub success_count: u64,
    pub excluded: bool,
    pub sample_count: u64,
}

impl ProxyRecord {
    pub fn new(address: ProxyAddress) -> Self {
        Self {
            address,
            latency: INITIAL_LATENCY,
            weight: 1.0 / INITIAL_LATENCY,
            failure_count: 0,
            success_count: 0,
            excluded: false,
            sample_count: 0,
        }
    }

    /// Failure rate in [0, 1)
    pub fn failrate(&self) -> f64 {
        self.failure_count as f64
            / (self.success_count as f64 + self.failure_count as f64 + FAILRATE_EPSILON)
    }

    /// Not excluded and below the failure threshold
    pub fn is_good(&self, max_failrate: f64) -> bool {
        !self.excluded && self.failrate() < max_failrate
    }

    /// Overwrite the latency with the latest observation, no smoothing.
    pub fn record_latency(&mut self, seconds: f64) {
        self.latency = seconds;
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn mark_excluded(&mut self) {
        self.excluded = true;
    }

    pub fn snapshot(&self, max_failrate: f64) -> ProxySnapshot {
        ProxySnapshot {
            address: self.address.to_string(),
            latency: self.latency,
            failure_count: self.failure_count,
            success_count: self.success_count,
            failrate: self.failrate(),
            excluded: self.excluded,
            good: self.is_good(max_failrate),
            sample_count: self.sample_count,
        }
    }
}

impl std::fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: latency: {:.6} ({}/{}={:.2} failrate)",
            self.address,
            self.latency,
            self.failure_count,
            self.failure_count + self.success_count,
            self.failrate()
        )
    }
}

/// Point-in-time view of a record, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySnapshot {
    pub address: String,
    pub latency: f64,
    pub failure_count: u64,
    pub success_count: u64,
    pub failrate: f64,
    pub excluded: bool,
    pub good: bool,
    pub sample_count: u64,
}
