//! Proxy node and Tor exit region descriptors
//!
//! These are the records held by the [`ProxyRegistry`](crate::ProxyRegistry).
//! Only the health prober mutates the status fields of a node; everything
//! else treats nodes as read-only values.
//!
//! # Protocol transitions
//!
//! | Previous hop | May be followed by |
//! |--------------|--------------------|
//! | SOCKS5 | HTTP, HTTPS, SOCKS4, SOCKS5 |
//! | SOCKS4 | HTTP, SOCKS4, SOCKS5 |
//! | HTTPS | HTTP, HTTPS |
//! | HTTP | HTTP |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Unique node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Proxy protocol spoken by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    /// Get all protocols
    pub fn all() -> &'static [ProxyProtocol] {
        &[
            ProxyProtocol::Http,
            ProxyProtocol::Https,
            ProxyProtocol::Socks4,
            ProxyProtocol::Socks5,
        ]
    }

    /// Lowercase URI scheme
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    /// Parse a URI scheme (case-insensitive)
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.scheme().eq_ignore_ascii_case(scheme))
    }

    /// Keyword used for this protocol in a PAC return string
    pub fn pac_keyword(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "PROXY",
            ProxyProtocol::Https => "HTTPS",
            ProxyProtocol::Socks4 => "SOCKS",
            ProxyProtocol::Socks5 => "SOCKS5",
        }
    }

    /// Parse a PAC keyword
    pub fn from_pac_keyword(keyword: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.pac_keyword() == keyword)
    }

    /// Is this one of the SOCKS protocols?
    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    /// Can a hop speaking `self` carry traffic to a next hop speaking `next`?
    pub fn can_precede(&self, next: ProxyProtocol) -> bool {
        match self {
            ProxyProtocol::Socks5 => true,
            // SOCKS-only, cannot supply the TLS upgrade an HTTPS hop expects
            ProxyProtocol::Socks4 => next != ProxyProtocol::Https,
            ProxyProtocol::Https => !next.is_socks(),
            ProxyProtocol::Http => next == ProxyProtocol::Http,
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme().to_uppercase())
    }
}

impl FromStr for ProxyProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_scheme(s).ok_or_else(|| format!("unknown proxy protocol: {}", s))
    }
}

/// How much a proxy reveals about the originating client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnonymityLevel {
    /// Forwards the client address
    Transparent,
    /// Hides the client address but identifies itself as a proxy
    Anonymous,
    /// Indistinguishable from a direct client
    Elite,
}

/// Node health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    Untested,
    Healthy,
    Unhealthy,
    /// No longer listed by the catalog source
    Expired,
}

impl NodeStatus {
    /// Ordering used when ranking candidates (lower is better)
    pub(crate) fn rank(&self) -> u8 {
        match self {
            NodeStatus::Healthy => 0,
            NodeStatus::Untested => 1,
            NodeStatus::Unhealthy => 2,
            NodeStatus::Expired => 3,
        }
    }
}

/// A candidate proxy node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyNode {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    /// ISO 3166-1 alpha-2, uppercase
    pub country_code: String,
    pub anonymity: AnonymityLevel,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Anonymity reported by the last successful probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_anonymity: Option<AnonymityLevel>,
    /// Exit country reported by the last judged probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_country: Option<String>,
}

impl ProxyNode {
    /// Create an untested node
    pub fn new(
        id: impl Into<NodeId>,
        host: impl Into<String>,
        port: u16,
        protocol: ProxyProtocol,
        country_code: &str,
        anonymity: AnonymityLevel,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            protocol,
            country_code: country_code.to_uppercase(),
            anonymity,
            status: NodeStatus::Untested,
            last_latency_ms: None,
            last_checked_at: None,
            observed_anonymity: None,
            observed_country: None,
        }
    }

    /// Set the status (builder style, handy for synthetic catalogs)
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `scheme://host:port`
    pub fn uri(&self) -> String {
        format!("{}://{}", self.protocol.scheme(), self.endpoint())
    }

    /// Host is a DNS name or an IP literal and the port is non-zero
    pub fn has_valid_address(&self) -> bool {
        self.port != 0 && is_valid_host(&self.host)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Healthy
    }

    /// Observed anonymity if probed, otherwise the declared level
    pub fn effective_anonymity(&self) -> AnonymityLevel {
        self.observed_anonymity.unwrap_or(self.anonymity)
    }

    /// Observed exit country if judged, otherwise the declared one
    pub fn effective_country(&self) -> &str {
        self.observed_country.as_deref().unwrap_or(&self.country_code)
    }

    /// Case-insensitive match on the effective country
    pub fn in_country(&self, code: &str) -> bool {
        self.effective_country().eq_ignore_ascii_case(code)
    }
}

fn is_valid_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<Ipv6Addr>().is_ok();
    }
    if host.contains(':') {
        return host.parse::<Ipv6Addr>().is_ok();
    }
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }

    host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Relative speed of a Tor exit region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelativeSpeed {
    Fast,
    Medium,
    Slow,
}

/// Tor exit region reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorExitRegion {
    /// ISO 3166-1 alpha-2, lowercase as used in torrc
    pub country_code: String,
    pub display_name: String,
    pub estimated_node_count: u32,
    pub relative_speed: RelativeSpeed,
}

impl TorExitRegion {
    pub fn new(code: &str, display_name: &str, nodes: u32, speed: RelativeSpeed) -> Self {
        Self {
            country_code: code.to_lowercase(),
            display_name: display_name.to_string(),
            estimated_node_count: nodes,
            relative_speed: speed,
        }
    }
}
