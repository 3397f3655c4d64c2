//! Health Prober
//!
//! Tests proxy nodes concurrently and writes the outcome back into the
//! registry.
//!
//! # Batch model
//!
//! ```text
//! nodes ──▶ JoinSet ──▶ Semaphore (concurrency_limit) ──▶ timeout(NodeProbe::check)
//!                                                              │
//!        registry ◀── status/latency update ◀── result ◀───────┘
//! ```
//!
//! - Every requested node yields exactly one [`HealthCheckResult`]
//! - Each result is written to the registry as soon as it lands, so a
//!   cancelled batch keeps what it already finished
//! - Cancelled probes reset their node to `Untested`
//! - No retries; callers decide whether to probe again
//!
//! # Handshakes
//!
//! [`HandshakeProbe`] speaks each node's protocol: TLS first for HTTPS
//! proxies, trusting the webpki roots unless given its own store. A
//! successful handshake only sets status and latency. Observed anonymity
//! and exit country come from a judge (see [`JudgeEndpoint`]) and are left
//! untouched when no judge answered.

use crate::judge::{JudgeEndpoint, JudgeReport};
use crate::node::{AnonymityLevel, NodeId, NodeStatus, ProxyNode, ProxyProtocol};
use crate::registry::ProxyRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// SOCKS5 version
const SOCKS5_VERSION: u8 = 0x05;
/// SOCKS4 version
const SOCKS4_VERSION: u8 = 0x04;

const AUTH_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ADDR_IPV4: u8 = 0x01;
const ADDR_DOMAIN: u8 = 0x03;
const ADDR_IPV6: u8 = 0x04;

/// SOCKS5 reply code
const REPLY_SUCCESS: u8 = 0x00;
/// SOCKS4 "request granted"
const SOCKS4_GRANTED: u8 = 0x5A;

/// Options for one probe batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Maximum probes in flight at once
    pub concurrency_limit: usize,
    /// Independent timeout for each probe
    pub per_probe_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            per_probe_timeout: Duration::from_millis(3000),
        }
    }
}

/// Typed probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeFailure {
    Timeout,
    ConnectionRefused,
    ProtocolError,
    /// Batch was cancelled before this probe finished
    Cancelled,
    /// ID not present in the registry
    UnknownNode,
}

/// Successful probe measurements
///
/// The observed fields are only set when the probe could tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSuccess {
    pub latency_ms: u32,
    pub observed_anonymity: Option<AnonymityLevel>,
    pub observed_country: Option<String>,
}

/// Result of probing one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_anonymity: Option<AnonymityLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl HealthCheckResult {
    pub fn succeeded(success: ProbeSuccess) -> Self {
        Self {
            success: true,
            latency_ms: Some(success.latency_ms),
            observed_anonymity: success.observed_anonymity,
            observed_country: success.observed_country,
            error: None,
            detail: None,
            checked_at: Some(Utc::now()),
        }
    }

    pub fn failed(kind: ProbeFailure, detail: Option<String>) -> Self {
        let checked_at = match kind {
            ProbeFailure::Cancelled | ProbeFailure::UnknownNode => None,
            _ => Some(Utc::now()),
        };
        Self {
            success: false,
            latency_ms: None,
            observed_anonymity: None,
            observed_country: None,
            error: Some(kind),
            detail,
            checked_at,
        }
    }

    /// Node status this result leaves behind, if it changes one
    fn resulting_status(&self) -> Option<NodeStatus> {
        match self.error {
            None => Some(NodeStatus::Healthy),
            Some(ProbeFailure::Cancelled) => Some(NodeStatus::Untested),
            Some(ProbeFailure::UnknownNode) => None,
            Some(_) => Some(NodeStatus::Unhealthy),
        }
    }
}

/// Error from a single probe attempt
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl ProbeError {
    pub fn kind(&self) -> ProbeFailure {
        match self {
            ProbeError::ConnectionRefused(_) => ProbeFailure::ConnectionRefused,
            ProbeError::Protocol(_) | ProbeError::Tls(_) => ProbeFailure::ProtocolError,
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        ProbeError::Protocol(e.to_string())
    }
}

/// One reachability check against one node
///
/// Implementations must not apply their own overall timeout; the prober
/// wraps every call in `per_probe_timeout`.
#[async_trait]
pub trait NodeProbe: Send + Sync + 'static {
    async fn check(&self, node: &ProxyNode) -> Result<ProbeSuccess, ProbeError>;
}

/// Probe that opens a TCP connection and runs the node's handshake
///
/// - SOCKS5: method negotiation, then CONNECT
/// - SOCKS4: SOCKS4a CONNECT
/// - HTTP: `CONNECT target HTTP/1.1`, expecting a 2xx reply
/// - HTTPS: TLS to the proxy first, then the same `CONNECT`
///
/// Without a judge the handshake only proves the node relays, so nothing
/// is reported as observed. With a [`JudgeEndpoint`] the probe fetches the
/// judge through the node and reports the anonymity and country it saw.
#[derive(Clone)]
pub struct HandshakeProbe {
    target_host: String,
    target_port: u16,
    tls: TlsConnector,
    judge: Option<JudgeEndpoint>,
}

impl HandshakeProbe {
    /// Probe that trusts the webpki root certificates
    pub fn new(target_host: impl Into<String>, target_port: u16) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        Self {
            target_host: target_host.into(),
            target_port,
            tls: tls_connector(roots),
            judge: None,
        }
    }

    /// Trust only `roots` when talking TLS to HTTPS proxies
    pub fn with_root_certificates(mut self, roots: RootCertStore) -> Self {
        self.tls = tls_connector(roots);
        self
    }

    /// Judge anonymity and exit country through `judge`
    pub fn with_judge(mut self, judge: JudgeEndpoint) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Where tunnels are opened to: the judge if there is one
    fn destination(&self) -> (&str, u16) {
        match &self.judge {
            Some(judge) => (judge.host(), judge.port()),
            None => (self.target_host.as_str(), self.target_port),
        }
    }

    /// Handshake, then the judge request if configured
    async fn exchange<S>(&self, protocol: ProxyProtocol, stream: &mut S) -> Result<Option<JudgeReport>, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (host, port) = self.destination();
        match protocol {
            ProxyProtocol::Socks5 => socks5_connect(stream, host, port).await?,
            ProxyProtocol::Socks4 => socks4_connect(stream, host, port).await?,
            ProxyProtocol::Http | ProxyProtocol::Https => match &self.judge {
                // A plain request lets the proxy add its headers
                Some(judge) => return judge.fetch_via_proxy(stream).await.map(Some),
                None => http_connect(stream, host, port).await?,
            },
        }

        match &self.judge {
            Some(judge) => judge.fetch_in_tunnel(stream).await.map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for HandshakeProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeProbe")
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("judge", &self.judge)
            .finish_non_exhaustive()
    }
}

fn tls_connector(roots: RootCertStore) -> TlsConnector {
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn socks5_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[SOCKS5_VERSION, 1, AUTH_NO_AUTH]).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS5_VERSION {
        return Err(ProbeError::Protocol(format!("not a SOCKS5 server (version {})", choice[0])));
    }
    if choice[1] != AUTH_NO_AUTH {
        return Err(ProbeError::Protocol("SOCKS5 server requires authentication".into()));
    }

    let name = host.as_bytes();
    let name_len = u8::try_from(name.len())
        .map_err(|_| ProbeError::Protocol("probe target name too long".into()))?;
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00, ADDR_DOMAIN, name_len];
    request.extend_from_slice(name);
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[1] != REPLY_SUCCESS {
        return Err(ProbeError::Protocol(format!("SOCKS5 CONNECT rejected (reply {})", reply[1])));
    }

    // Skip the bound address so a tunnelled request starts clean
    let bound_len = match reply[3] {
        ADDR_IPV4 => 4,
        ADDR_IPV6 => 16,
        ADDR_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0])
        }
        other => return Err(ProbeError::Protocol(format!("SOCKS5 reply has address type {}", other))),
    };
    let mut bound = vec![0u8; bound_len + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

async fn socks4_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // SOCKS4a: 0.0.0.x address, empty user ID, then the host name
    let mut request = vec![SOCKS4_VERSION, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&[0, 0, 0, 1, 0]);
    request.extend_from_slice(host.as_bytes());
    request.push(0);
    stream.write_all(&request).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] != SOCKS4_GRANTED {
        return Err(ProbeError::Protocol(format!("SOCKS4 CONNECT rejected (reply {:#x})", reply[1])));
    }
    Ok(())
}

async fn http_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = format!("{}:{}", host, port);
    let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", authority);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    while !buf.windows(2).any(|w| w == b"\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProbeError::Protocol("connection closed before status line".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 4096 {
            return Err(ProbeError::Protocol("status line too long".into()));
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code: u16 = parts
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| ProbeError::Protocol(format!("malformed status line: {}", status_line)))?;

    if !version.starts_with("HTTP/") {
        return Err(ProbeError::Protocol(format!("not an HTTP proxy: {}", status_line)));
    }
    match code {
        200..=299 => Ok(()),
        407 => Err(ProbeError::Protocol("proxy authentication required (407)".into())),
        _ => Err(ProbeError::Protocol(format!("CONNECT returned {}", code))),
    }
}

#[async_trait]
impl NodeProbe for HandshakeProbe {
    async fn check(&self, node: &ProxyNode) -> Result<ProbeSuccess, ProbeError> {
        let start = Instant::now();

        let mut stream = TcpStream::connect((node.host.as_str(), node.port))
            .await
            .map_err(|e| ProbeError::ConnectionRefused(e.to_string()))?;

        let report = match node.protocol {
            ProxyProtocol::Https => {
                let name = node.host.trim_start_matches('[').trim_end_matches(']').to_string();
                let server_name = ServerName::try_from(name)
                    .map_err(|_| ProbeError::Tls(format!("invalid server name: {}", node.host)))?;
                let mut tls = self
                    .tls
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ProbeError::Tls(e.to_string()))?;
                self.exchange(node.protocol, &mut tls).await?
            }
            protocol => self.exchange(protocol, &mut stream).await?,
        };

        let latency_ms = u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX);
        if let Some(report) = &report {
            debug!("Judge saw {} as {:?} from {:?}", node.id, report.anonymity, report.country);
        }
        Ok(ProbeSuccess {
            latency_ms,
            observed_anonymity: report.as_ref().map(|r| r.anonymity),
            observed_country: report.and_then(|r| r.country),
        })
    }
}

/// Cancellation handle for a probe batch
///
/// Clones share state; cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop issuing probes and abandon in-flight ones
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrent health prober bound to a registry
#[derive(Clone)]
pub struct HealthProber {
    registry: Arc<ProxyRegistry>,
    probe: Arc<dyn NodeProbe>,
}

impl HealthProber {
    pub fn new(registry: Arc<ProxyRegistry>, probe: Arc<dyn NodeProbe>) -> Self {
        Self { registry, probe }
    }

    /// Probe the registry nodes with the given IDs
    ///
    /// IDs the registry does not know get an `UnknownNode` result.
    pub async fn probe_ids(
        &self,
        ids: &[NodeId],
        options: ProbeOptions,
        cancel: &CancelToken,
    ) -> HashMap<NodeId, HealthCheckResult> {
        let snapshot = self.registry.snapshot();
        let mut unknown = HashMap::new();
        let mut nodes = Vec::with_capacity(ids.len());

        for id in ids {
            match snapshot.node(id) {
                Some(node) => nodes.push(node.clone()),
                None => {
                    debug!("Probe requested for unknown node {}", id);
                    unknown.insert(id.clone(), HealthCheckResult::failed(ProbeFailure::UnknownNode, None));
                }
            }
        }

        let mut results = self.probe(nodes, options, cancel).await;
        results.extend(unknown);
        results
    }

    /// Probe every non-expired node in the registry
    pub async fn probe_all(
        &self,
        options: ProbeOptions,
        cancel: &CancelToken,
    ) -> HashMap<NodeId, HealthCheckResult> {
        let nodes: Vec<ProxyNode> = self
            .registry
            .snapshot()
            .nodes()
            .iter()
            .filter(|n| n.status != NodeStatus::Expired)
            .map(|n| ProxyNode::clone(n))
            .collect();
        self.probe(nodes, options, cancel).await
    }

    /// Probe a batch of nodes
    ///
    /// Returns once every node has a result. Duplicate IDs are probed once.
    pub async fn probe(
        &self,
        nodes: Vec<ProxyNode>,
        options: ProbeOptions,
        cancel: &CancelToken,
    ) -> HashMap<NodeId, HealthCheckResult> {
        let mut seen = HashSet::new();
        let nodes: Vec<ProxyNode> = nodes
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();
        let requested: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();

        info!(
            "Probing {} nodes (concurrency {}, timeout {:?})",
            nodes.len(),
            options.concurrency_limit,
            options.per_probe_timeout
        );

        let semaphore = Arc::new(Semaphore::new(options.concurrency_limit.max(1)));
        let mut tasks = JoinSet::new();

        if !cancel.is_cancelled() {
            for node in nodes {
                let probe = self.probe.clone();
                let semaphore = semaphore.clone();
                let timeout = options.per_probe_timeout;

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = match tokio::time::timeout(timeout, probe.check(&node)).await {
                        Ok(Ok(success)) => HealthCheckResult::succeeded(success),
                        Ok(Err(e)) => HealthCheckResult::failed(e.kind(), Some(e.to_string())),
                        Err(_) => HealthCheckResult::failed(ProbeFailure::Timeout, None),
                    };
                    (node.id, result)
                });
            }
        }

        let mut results: HashMap<NodeId, HealthCheckResult> = HashMap::with_capacity(requested.len());
        let mut cancelled = cancel.is_cancelled();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancelled => {
                    warn!("Probe batch cancelled, abandoning {} pending probes", tasks.len());
                    tasks.abort_all();
                    cancelled = true;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((id, result))) => {
                        if let Some(kind) = result.error {
                            debug!("Probe of {} failed: {:?}", id, kind);
                        }
                        self.record(&id, &result);
                        results.insert(id, result);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!("Probe task failed: {}", e),
                },
            }
        }

        // Aborted or panicked tasks never reported their node
        for id in requested {
            if results.contains_key(&id) {
                continue;
            }
            let result = if cancelled {
                HealthCheckResult::failed(ProbeFailure::Cancelled, None)
            } else {
                HealthCheckResult::failed(ProbeFailure::ProtocolError, Some("probe task failed".into()))
            };
            self.record(&id, &result);
            results.insert(id, result);
        }

        let healthy = results.values().filter(|r| r.success).count();
        info!("Probe batch complete: {}/{} healthy", healthy, results.len());

        results
    }

    /// Write one result back into the registry
    fn record(&self, id: &NodeId, result: &HealthCheckResult) {
        let Some(status) = result.resulting_status() else {
            return;
        };
        let ids: HashSet<NodeId> = [id.clone()].into_iter().collect();

        self.registry.update_nodes(&ids, |node| {
            node.status = status;
            if status == NodeStatus::Untested {
                return;
            }
            node.last_checked_at = result.checked_at;
            if result.success {
                node.last_latency_ms = result.latency_ms;
                if result.observed_anonymity.is_some() {
                    node.observed_anonymity = result.observed_anonymity;
                }
                if result.observed_country.is_some() {
                    node.observed_country = result.observed_country.clone();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogFile;
    use rustls::ServerConfig;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_rustls::TlsAcceptor;

    /// Scripted probe keyed on the node's host
    ///
    /// "ok" succeeds, "refused" is refused, "slow" sleeps 10s,
    /// "hang" never finishes.
    #[derive(Default)]
    struct ScriptedProbe {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl NodeProbe for ScriptedProbe {
        async fn check(&self, node: &ProxyNode) -> Result<ProbeSuccess, ProbeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = match node.host.as_str() {
                "refused" => Err(ProbeError::ConnectionRefused("refused".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Err(ProbeError::Protocol("too late".into()))
                }
                "hang" => std::future::pending().await,
                _ => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(ProbeSuccess {
                        latency_ms: 50,
                        observed_anonymity: Some(AnonymityLevel::Anonymous),
                        observed_country: Some(node.country_code.clone()),
                    })
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn node(id: &str, host: &str) -> ProxyNode {
        ProxyNode::new(id, host, 1080, ProxyProtocol::Socks5, "US", AnonymityLevel::Elite)
    }

    fn setup(nodes: Vec<ProxyNode>) -> (Arc<ProxyRegistry>, Arc<ScriptedProbe>, HealthProber) {
        let registry = Arc::new(ProxyRegistry::new(CatalogFile {
            nodes,
            tor_regions: Vec::new(),
        }));
        let probe = Arc::new(ScriptedProbe::default());
        let prober = HealthProber::new(registry.clone(), probe.clone());
        (registry, probe, prober)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_node_gets_one_result() {
        let nodes = vec![node("a", "ok"), node("b", "refused"), node("c", "slow"), node("a", "ok")];
        let (registry, _, prober) = setup(nodes.clone());

        let results = prober.probe(nodes, ProbeOptions::default(), &CancelToken::new()).await;

        assert_eq!(results.len(), 3);
        assert!(results[&NodeId::from("a")].success);
        assert_eq!(results[&NodeId::from("b")].error, Some(ProbeFailure::ConnectionRefused));
        assert_eq!(results[&NodeId::from("c")].error, Some(ProbeFailure::Timeout));

        let a = registry.node(&NodeId::from("a")).unwrap();
        assert_eq!(a.status, NodeStatus::Healthy);
        assert_eq!(a.last_latency_ms, Some(50));
        assert_eq!(a.observed_anonymity, Some(AnonymityLevel::Anonymous));
        assert_eq!(registry.node(&NodeId::from("b")).unwrap().status, NodeStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_unhealthy() {
        let (registry, _, prober) = setup(vec![node("slow", "slow")]);
        let options = ProbeOptions {
            concurrency_limit: 4,
            per_probe_timeout: Duration::from_millis(3000),
        };

        let results = prober.probe_ids(&[NodeId::from("slow")], options, &CancelToken::new()).await;

        let result = &results[&NodeId::from("slow")];
        assert!(!result.success);
        assert_eq!(result.error, Some(ProbeFailure::Timeout));

        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Timeout");

        let node = registry.node(&NodeId::from("slow")).unwrap();
        assert_eq!(node.status, NodeStatus::Unhealthy);
        assert!(node.last_checked_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let nodes: Vec<ProxyNode> = (0..6).map(|i| node(&format!("n{}", i), "ok")).collect();
        let (_, probe, prober) = setup(nodes.clone());
        let options = ProbeOptions {
            concurrency_limit: 2,
            per_probe_timeout: Duration::from_secs(3),
        };

        let results = prober.probe(nodes, options, &CancelToken::new()).await;

        assert_eq!(results.len(), 6);
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_ids() {
        let (_, _, prober) = setup(vec![node("a", "ok")]);

        let ids = [NodeId::from("a"), NodeId::from("ghost")];
        let results = prober.probe_ids(&ids, ProbeOptions::default(), &CancelToken::new()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[&NodeId::from("ghost")].error, Some(ProbeFailure::UnknownNode));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_finished_and_resets_pending() {
        let nodes = vec![
            node("fast", "ok"),
            node("stuck", "hang").with_status(NodeStatus::Healthy),
        ];
        let (registry, _, prober) = setup(nodes.clone());
        let cancel = CancelToken::new();
        let options = ProbeOptions {
            concurrency_limit: 2,
            per_probe_timeout: Duration::from_secs(60),
        };

        let (results, _) = tokio::join!(prober.probe(nodes, options, &cancel), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });

        assert_eq!(results.len(), 2);
        assert!(results[&NodeId::from("fast")].success);
        assert_eq!(results[&NodeId::from("stuck")].error, Some(ProbeFailure::Cancelled));

        assert_eq!(registry.node(&NodeId::from("fast")).unwrap().status, NodeStatus::Healthy);
        assert_eq!(registry.node(&NodeId::from("stuck")).unwrap().status, NodeStatus::Untested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_precancelled_batch() {
        let nodes = vec![node("a", "ok"), node("b", "ok")];
        let (registry, probe, prober) = setup(nodes.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let results = prober.probe(nodes, ProbeOptions::default(), &cancel).await;

        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.error == Some(ProbeFailure::Cancelled)));
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(registry.node(&NodeId::from("a")).unwrap().status, NodeStatus::Untested);
    }

    async fn serve_once(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf).await;
            stream.write_all(reply).await.unwrap();
            // SOCKS5 sends a second request after method selection
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(&[SOCKS5_VERSION, REPLY_SUCCESS, 0, 1, 0, 0, 0, 0, 0, 0]).await;
        });

        port
    }

    fn local(protocol: ProxyProtocol, port: u16) -> ProxyNode {
        ProxyNode::new("local", "127.0.0.1", port, protocol, "US", AnonymityLevel::Elite)
    }

    #[tokio::test]
    async fn test_handshake_http_connect() {
        let probe = HandshakeProbe::new("example.com", 443);

        let port = serve_once(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
        let success = probe.check(&local(ProxyProtocol::Http, port)).await.unwrap();
        // A bare handshake says nothing about what the far end sees
        assert_eq!(success.observed_anonymity, None);
        assert_eq!(success.observed_country, None);

        let port = serve_once(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        let err = probe.check(&local(ProxyProtocol::Http, port)).await.unwrap_err();
        assert_eq!(err.kind(), ProbeFailure::ProtocolError);
    }

    #[tokio::test]
    async fn test_handshake_socks() {
        let probe = HandshakeProbe::new("example.com", 443);

        let port = serve_once(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await;
        assert!(probe.check(&local(ProxyProtocol::Socks5, port)).await.is_ok());

        let port = serve_once(&[0x00, SOCKS4_GRANTED, 0, 0, 0, 0, 0, 0]).await;
        assert!(probe.check(&local(ProxyProtocol::Socks4, port)).await.is_ok());

        let port = serve_once(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        let err = probe.check(&local(ProxyProtocol::Socks5, port)).await.unwrap_err();
        assert_eq!(err.kind(), ProbeFailure::ProtocolError);
    }

    #[tokio::test]
    async fn test_handshake_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HandshakeProbe::new("example.com", 443);
        let err = probe.check(&local(ProxyProtocol::Http, port)).await.unwrap_err();
        assert_eq!(err.kind(), ProbeFailure::ConnectionRefused);
    }

    /// Read up to the blank line ending a request head
    async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    fn judge_reply(body: &str) -> String {
        format!("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
    }

    #[tokio::test]
    async fn test_https_node_gets_tls_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut first = [0u8; 1];
            stream.read_exact(&mut first).await.unwrap();
            let _ = tx.send(first[0]);
        });

        let checker = HandshakeProbe::new("example.com", 443);
        let err = checker.check(&local(ProxyProtocol::Https, port)).await.unwrap_err();

        // 0x16 opens a TLS handshake record; a plain CONNECT would start with 'C'
        assert_eq!(rx.await.unwrap(), 0x16);
        assert_eq!(err.kind(), ProbeFailure::ProtocolError);
    }

    #[tokio::test]
    async fn test_https_connect_over_tls() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(stream).await.unwrap();
            let head = read_head(&mut tls).await;
            tls.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await.unwrap();
            tls.flush().await.unwrap();
            let _ = tx.send(head);
            let mut rest = Vec::new();
            let _ = tls.read_to_end(&mut rest).await;
        });

        let mut roots = RootCertStore::empty();
        roots.add(cert.der().clone()).unwrap();
        let checker = HandshakeProbe::new("example.com", 443).with_root_certificates(roots);

        let node = ProxyNode::new("tls", "localhost", port, ProxyProtocol::Https, "US", AnonymityLevel::Elite);
        checker.check(&node).await.unwrap();

        let head = rx.await.unwrap();
        assert!(head.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"), "{}", head);
    }

    #[tokio::test]
    async fn test_judge_through_http_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let head = read_head(&mut stream).await;
            // The proxy is asked for the judge directly, no CONNECT
            assert!(head.starts_with("GET http://judge.test/echo HTTP/1.1\r\n"), "{}", head);
            let reply = judge_reply("HTTP_HOST = judge.test\nHTTP_VIA = 1.1 squid\nCOUNTRY = de\n");
            stream.write_all(reply.as_bytes()).await.unwrap();
        });

        let judge = JudgeEndpoint::parse("http://judge.test/echo").unwrap();
        let checker = HandshakeProbe::new("example.com", 443).with_judge(judge);

        let success = checker.check(&local(ProxyProtocol::Http, port)).await.unwrap();
        assert_eq!(success.observed_anonymity, Some(AnonymityLevel::Anonymous));
        assert_eq!(success.observed_country.as_deref(), Some("DE"));
    }

    /// SOCKS5 server that tunnels to a judge answering with `body`
    async fn socks_judge(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            stream.read_exact(&mut greeting).await.unwrap();
            stream.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await.unwrap();

            let mut request = [0u8; 5];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(request[3], ADDR_DOMAIN);
            let mut name = vec![0u8; usize::from(request[4]) + 2];
            stream.read_exact(&mut name).await.unwrap();
            assert_eq!(&name[..name.len() - 2], b"judge.test");
            assert_eq!(&name[name.len() - 2..], &80u16.to_be_bytes());
            stream.write_all(&[SOCKS5_VERSION, REPLY_SUCCESS, 0, ADDR_IPV4, 10, 0, 0, 1, 0x1f, 0x90]).await.unwrap();

            let head = read_head(&mut stream).await;
            assert!(head.starts_with("GET /echo HTTP/1.1\r\nHost: judge.test\r\n"), "{}", head);
            stream.write_all(judge_reply(body).as_bytes()).await.unwrap();
        });

        port
    }

    #[tokio::test]
    async fn test_judge_through_socks_tunnel() {
        let judge = JudgeEndpoint::parse("http://judge.test/echo").unwrap();
        let checker = HandshakeProbe::new("example.com", 443).with_judge(judge);

        let port = socks_judge("Host: judge.test\r\nX-Forwarded-For: 198.51.100.7\r\nCountry: us\r\n").await;
        let success = checker.check(&local(ProxyProtocol::Socks5, port)).await.unwrap();
        assert_eq!(success.observed_anonymity, Some(AnonymityLevel::Transparent));
        assert_eq!(success.observed_country.as_deref(), Some("US"));

        let port = socks_judge("Host: judge.test\r\nAccept: text/plain\r\n").await;
        let success = checker.check(&local(ProxyProtocol::Socks5, port)).await.unwrap();
        assert_eq!(success.observed_anonymity, Some(AnonymityLevel::Elite));
        assert_eq!(success.observed_country, None);
    }

    #[tokio::test]
    async fn test_judge_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_head(&mut stream).await;
            stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n").await.unwrap();
        });

        let judge = JudgeEndpoint::parse("http://judge.test/echo").unwrap();
        let checker = HandshakeProbe::new("example.com", 443).with_judge(judge);

        let err = checker.check(&local(ProxyProtocol::Http, port)).await.unwrap_err();
        assert_eq!(err.kind(), ProbeFailure::ProtocolError);
    }

    #[test]
    fn test_unjudged_success_keeps_last_known_values() {
        let nodes = vec![node("a", "ok")];
        let (registry, _, health) = setup(nodes);
        let id = NodeId::from("a");
        let ids: HashSet<NodeId> = [id.clone()].into_iter().collect();
        registry.update_nodes(&ids, |node| {
            node.observed_anonymity = Some(AnonymityLevel::Transparent);
            node.observed_country = Some("FR".into());
        });

        let success = ProbeSuccess {
            latency_ms: 12,
            observed_anonymity: None,
            observed_country: None,
        };
        health.record(&id, &HealthCheckResult::succeeded(success));

        let after = registry.node(&id).unwrap();
        assert_eq!(after.status, NodeStatus::Healthy);
        assert_eq!(after.last_latency_ms, Some(12));
        assert_eq!(after.observed_anonymity, Some(AnonymityLevel::Transparent));
        assert_eq!(after.observed_country.as_deref(), Some("FR"));
    }
}
