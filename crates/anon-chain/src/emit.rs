//! Routing Descriptor Emission
//!
//! Serializes a chain, an optional Tor directive and the policy flags into
//! the descriptor consumed by the browser-launch collaborator.
//!
//! The descriptor carries the hop order twice: as a flat URI list and as a
//! proxy auto-configuration (PAC) script. Both decode to the same ordered
//! hop list.
//!
//! ```text
//! proxyURIs: ["socks5://72.210.252.134:46164", "https://45.77.177.11:3128"]
//!
//! var PROXY_CHAIN = [
//!   "SOCKS5 72.210.252.134:46164",
//!   "HTTPS 45.77.177.11:3128"
//! ];
//! function FindProxyForURL(url, host) {
//!   return PROXY_CHAIN[0];
//! }
//! ```

use crate::chain::{Chain, ChainViolation};
use crate::node::{NodeId, ProxyProtocol};
use crate::policy::{HardeningFlags, PolicyConfig};
use crate::tor::TorDirective;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const PAC_CHAIN_OPEN: &str = "var PROXY_CHAIN = [";
const PAC_CHAIN_CLOSE: &str = "];";

/// Policy flags the emitter needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmitFlags {
    /// Re-check that every hop is healthy
    pub requires_health_gate: bool,
    /// Let the PAC script fall back to a direct connection
    pub allow_direct_fallback: bool,
    pub hardening: HardeningFlags,
}

impl From<&PolicyConfig> for EmitFlags {
    fn from(policy: &PolicyConfig) -> Self {
        Self {
            requires_health_gate: policy.requires_health_gate,
            allow_direct_fallback: policy.allow_direct_fallback,
            hardening: policy.hardening,
        }
    }
}

/// One decoded hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopSpec {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
}

/// Routing artifact for the launch collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDescriptor {
    /// `scheme://host:port`, client side first
    #[serde(rename = "proxyURIs")]
    pub proxy_uris: Vec<String>,
    pub tor_directive: Option<TorDirective>,
    pub hardening_flags: HardeningFlags,
    /// Equivalent proxy auto-configuration script
    pub pac_script: String,
    /// torrc lines for the Tor directive, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub torrc: Vec<String>,
    /// Chain is shorter than the policy asked for
    #[serde(default)]
    pub degraded: bool,
}

impl RoutingDescriptor {
    /// Decode the URI list into hops
    pub fn decode_uris(&self) -> Result<Vec<HopSpec>, EmitError> {
        self.proxy_uris.iter().map(|uri| parse_uri(uri)).collect()
    }

    /// Decode the PAC script into hops
    pub fn decode_pac(&self) -> Result<Vec<HopSpec>, EmitError> {
        let body = self
            .pac_script
            .split_once(PAC_CHAIN_OPEN)
            .and_then(|(_, rest)| rest.split_once(PAC_CHAIN_CLOSE))
            .map(|(body, _)| body)
            .ok_or_else(|| EmitError::Decode("PAC script has no proxy chain".into()))?;

        body.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let entry = entry
                    .strip_prefix('"')
                    .and_then(|e| e.strip_suffix('"'))
                    .ok_or_else(|| EmitError::Decode(format!("unquoted PAC entry: {}", entry)))?;
                parse_pac_entry(entry)
            })
            .collect()
    }

    /// Pretty JSON for the launch collaborator
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn parse_uri(uri: &str) -> Result<HopSpec, EmitError> {
    let (scheme, endpoint) = uri
        .split_once("://")
        .ok_or_else(|| EmitError::Decode(format!("missing scheme: {}", uri)))?;
    let protocol = ProxyProtocol::from_scheme(scheme)
        .ok_or_else(|| EmitError::Decode(format!("unknown scheme: {}", scheme)))?;
    parse_endpoint(protocol, endpoint)
}

fn parse_pac_entry(entry: &str) -> Result<HopSpec, EmitError> {
    let (keyword, endpoint) = entry
        .split_once(' ')
        .ok_or_else(|| EmitError::Decode(format!("malformed PAC entry: {}", entry)))?;
    let protocol = ProxyProtocol::from_pac_keyword(keyword)
        .ok_or_else(|| EmitError::Decode(format!("unknown PAC keyword: {}", keyword)))?;
    parse_endpoint(protocol, endpoint.trim())
}

fn parse_endpoint(protocol: ProxyProtocol, endpoint: &str) -> Result<HopSpec, EmitError> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| EmitError::Decode(format!("missing port: {}", endpoint)))?;
    let port = port
        .parse()
        .map_err(|_| EmitError::Decode(format!("invalid port: {}", port)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    Ok(HopSpec {
        protocol,
        host: host.to_string(),
        port,
    })
}

/// Builds routing descriptors
///
/// Stateless and deterministic: the same inputs always produce the same
/// descriptor, byte for byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigEmitter;

impl ConfigEmitter {
    pub fn new() -> Self {
        Self
    }

    /// Emit the descriptor for a chain
    ///
    /// Re-checks the chain invariants and, under a health gate, that every
    /// hop is healthy; a chain failing either is never emitted.
    pub fn emit(
        &self,
        chain: &Chain,
        tor: Option<&TorDirective>,
        flags: EmitFlags,
    ) -> Result<RoutingDescriptor, EmitError> {
        if let Err(violation) = chain.check(flags.requires_health_gate) {
            error!("Refusing to emit chain: {}", violation);
            return Err(EmitError::Rejected(violation));
        }
        if let Some(node) = chain.hops().iter().find(|n| !is_script_safe(&n.endpoint())) {
            error!("Refusing to emit chain: node {} has an unsafe address {:?}", node.id, node.host);
            return Err(EmitError::UnsafeEndpoint(node.id.clone()));
        }

        let proxy_uris: Vec<String> = chain.hops().iter().map(|n| n.uri()).collect();
        let pac_entries: Vec<String> = chain
            .hops()
            .iter()
            .map(|n| format!("{} {}", n.protocol.pac_keyword(), n.endpoint()))
            .collect();

        let descriptor = RoutingDescriptor {
            proxy_uris,
            tor_directive: tor.cloned(),
            hardening_flags: flags.hardening,
            pac_script: render_pac(&pac_entries, flags.allow_direct_fallback),
            torrc: tor.map(TorDirective::torrc_lines).unwrap_or_default(),
            degraded: chain.is_degraded(),
        };

        debug!(
            "Emitted descriptor: {} hops, tor {}",
            descriptor.proxy_uris.len(),
            descriptor.tor_directive.is_some()
        );
        Ok(descriptor)
    }
}

/// Endpoint can be quoted into the PAC script as-is
fn is_script_safe(endpoint: &str) -> bool {
    !endpoint.is_empty()
        && !endpoint
            .chars()
            .any(|c| matches!(c, '"' | '\'' | ',' | '\\' | ';') || c.is_whitespace() || c.is_control())
}

fn render_pac(entries: &[String], direct_fallback: bool) -> String {
    let mut script = String::new();
    script.push_str("// Proxy chain, client side first. The browser connects to the\n");
    script.push_str("// first hop; each hop relays to the next.\n");
    script.push_str(PAC_CHAIN_OPEN);
    script.push('\n');
    for (i, entry) in entries.iter().enumerate() {
        script.push_str("  \"");
        script.push_str(entry);
        script.push('"');
        if i + 1 < entries.len() {
            script.push(',');
        }
        script.push('\n');
    }
    script.push_str(PAC_CHAIN_CLOSE);
    script.push_str("\n\nfunction FindProxyForURL(url, host) {\n");
    if direct_fallback {
        script.push_str("  return PROXY_CHAIN[0] + \"; DIRECT\";\n");
    } else {
        script.push_str("  return PROXY_CHAIN[0];\n");
    }
    script.push_str("}\n");
    script
}

/// Emission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("Chain rejected at emission: {0}")]
    Rejected(ChainViolation),

    #[error("Node {0} has an address that cannot be written into a PAC script")]
    UnsafeEndpoint(NodeId),

    #[error("Descriptor decode error: {0}")]
    Decode(String),
}
