//! Chain Engine
//!
//! Facade the UI collaborator talks to. Wires the registry, prober,
//! policy, builder, Tor selector and emitter into the three inbound
//! operations.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = ChainEngine::from_config(&EngineConfig::default(), CatalogFile::seed())?;
//!
//! // "Test this proxy"
//! let results = engine.request_probe(&[NodeId::from("proxy10")]).await;
//!
//! // Build a route
//! let countries = vec!["US".to_string(), "DE".to_string()];
//! let descriptor = engine.request_chain(2, &countries, Some(SecurityLevel::High), Some("se"))?;
//!
//! // Or a named preset
//! let descriptor = engine.request_preset("chain4", Some(SecurityLevel::Medium), None)?;
//! ```
//!
//! # Request flow
//!
//! ```text
//! request ──▶ policy floor ──▶ snapshot ──▶ ChainBuilder ──▶ Tor directive ──▶ ConfigEmitter
//! ```

use crate::chain::{BuildMode, Chain, ChainBuilder, ChainError, ChainRequest};
use crate::config::{CatalogFile, ConfigError, EngineConfig};
use crate::emit::{ConfigEmitter, EmitError, EmitFlags, RoutingDescriptor};
use crate::node::NodeId;
use crate::policy::{PolicyConfig, PolicyError, SecurityLevel, SecurityPolicyEngine};
use crate::preset::ChainPreset;
use crate::probe::{CancelToken, HandshakeProbe, HealthCheckResult, HealthProber, NodeProbe, ProbeOptions};
use crate::registry::{CatalogSnapshot, CatalogSource, ProxyRegistry, RefreshResult, RegistryError};
use crate::tor::{AUTO_REGION, TorDirective, TorError, TorExitSelector};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Tor error: {0}")]
    Tor(#[from] TorError),

    #[error("Emit error: {0}")]
    Emit(#[from] EmitError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// Proxy chain engine
pub struct ChainEngine {
    registry: Arc<ProxyRegistry>,
    prober: HealthProber,
    builder: ChainBuilder,
    emitter: ConfigEmitter,
    policy: RwLock<SecurityPolicyEngine>,
    probe_options: ProbeOptions,
    mode: BuildMode,
    /// Exit region used when a request names none
    tor_region: Option<String>,
    presets: Vec<ChainPreset>,
}

impl ChainEngine {
    /// Create an engine over an existing registry and probe
    pub fn new(
        registry: Arc<ProxyRegistry>,
        probe: Arc<dyn NodeProbe>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let tor_region = config
            .tor_region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        if let Some(region) = &tor_region {
            TorExitSelector::new(&registry.snapshot()).resolve(region)?;
        }

        let mode = if config.chain.best_effort {
            BuildMode::BestEffort
        } else {
            BuildMode::Strict
        };

        info!(
            "Chain engine ready (level {}, seed {}, {:?})",
            config.security_level, config.chain.seed, mode
        );

        Ok(Self {
            prober: HealthProber::new(registry.clone(), probe),
            registry,
            builder: ChainBuilder::new(config.chain.seed),
            emitter: ConfigEmitter::new(),
            policy: RwLock::new(SecurityPolicyEngine::new(config.security_level)),
            probe_options: config.probe.options(),
            mode,
            tor_region,
            presets: ChainPreset::builtin(),
        })
    }

    /// Create an engine over `catalog` that probes with real handshakes
    pub fn from_config(config: &EngineConfig, catalog: CatalogFile) -> Result<Self, EngineError> {
        let registry = Arc::new(ProxyRegistry::new(catalog));
        let mut probe = HandshakeProbe::new(config.probe.target_host.clone(), config.probe.target_port);
        if let Some(judge) = config.probe.judge()? {
            info!("Judging probes through {}:{}", judge.host(), judge.port());
            probe = probe.with_judge(judge);
        }
        Self::new(registry, Arc::new(probe), config)
    }

    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.registry
    }

    /// Named chain presets, valid or not
    pub fn presets(&self) -> &[ChainPreset] {
        &self.presets
    }

    /// Currently selected security level
    pub fn security_level(&self) -> SecurityLevel {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
    }

    /// Switch the selected security level, returning the previous one
    pub fn select_level(&self, level: SecurityLevel) -> SecurityLevel {
        self.policy
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .select(level)
    }

    /// Build a chain and emit its routing descriptor
    ///
    /// `level` defaults to the selected level and `tor_region` to the
    /// configured one. A level that requires Tor gets an automatic exit
    /// when no region is given.
    pub fn request_chain(
        &self,
        desired_hops: usize,
        preferred_countries: &[String],
        level: Option<SecurityLevel>,
        tor_region: Option<&str>,
    ) -> Result<RoutingDescriptor, EngineError> {
        let level = level.unwrap_or_else(|| self.security_level());
        let policy = SecurityPolicyEngine::resolve(level);

        let request = ChainRequest::new(desired_hops)
            .with_countries(preferred_countries)
            .with_mode(self.mode);
        let request = SecurityPolicyEngine::validate_request(level, request)?;

        // One snapshot for the whole request
        let snapshot = self.registry.snapshot();
        let chain = self.builder.build(&snapshot, &request)?;

        let flags = EmitFlags {
            requires_health_gate: request.requires_health_gate,
            ..EmitFlags::from(&policy)
        };
        self.describe(&chain, &snapshot, &policy, request.requires_tor, flags, tor_region)
    }

    /// Emit the routing descriptor for a named preset
    ///
    /// The preset's hops are used as listed. They must form a valid chain,
    /// meet the level's hop floor and anonymity floor, and pass its health
    /// gate.
    pub fn request_preset(
        &self,
        id: &str,
        level: Option<SecurityLevel>,
        tor_region: Option<&str>,
    ) -> Result<RoutingDescriptor, EngineError> {
        let level = level.unwrap_or_else(|| self.security_level());
        let policy = SecurityPolicyEngine::resolve(level);

        let preset = self
            .presets
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id.trim()))
            .ok_or_else(|| ChainError::InvalidRequest(format!("unknown preset {}", id)))?;

        let snapshot = self.registry.snapshot();
        let chain = preset.resolve(&snapshot)?;

        if chain.len() < policy.min_hops {
            return Err(ChainError::InvalidRequest(format!(
                "preset {} has {} hops, {} requires at least {}",
                preset.id,
                chain.len(),
                level,
                policy.min_hops
            ))
            .into());
        }
        if let Some(node) = chain
            .hops()
            .iter()
            .find(|n| n.effective_anonymity() < policy.min_anonymity)
        {
            return Err(ChainError::InvalidRequest(format!(
                "preset {} hop {} is {:?}, {} requires {:?}",
                preset.id,
                node.id,
                node.effective_anonymity(),
                level,
                policy.min_anonymity
            ))
            .into());
        }

        self.describe(&chain, &snapshot, &policy, policy.requires_tor, EmitFlags::from(&policy), tor_region)
    }

    /// Attach the Tor directive and emit
    fn describe(
        &self,
        chain: &Chain,
        snapshot: &CatalogSnapshot,
        policy: &PolicyConfig,
        requires_tor: bool,
        flags: EmitFlags,
        tor_region: Option<&str>,
    ) -> Result<RoutingDescriptor, EngineError> {
        let level = policy.level;
        let region = tor_region.or(self.tor_region.as_deref());
        let tor = match region {
            Some(region) => Some(TorExitSelector::new(snapshot).resolve(region)?),
            None if requires_tor => Some(TorExitSelector::new(snapshot).resolve(AUTO_REGION)?),
            None => None,
        }
        .map(|directive: TorDirective| directive.strict(policy.strict_exit));

        let descriptor = self.emitter.emit(chain, tor.as_ref(), flags)?;

        info!(
            "Chain ready at {}: {} hops{}{}",
            level,
            chain.len(),
            if descriptor.tor_directive.is_some() { " + Tor" } else { "" },
            if descriptor.degraded { " (degraded)" } else { "" }
        );
        Ok(descriptor)
    }

    /// Probe the given nodes with the configured options
    pub async fn request_probe(&self, ids: &[NodeId]) -> HashMap<NodeId, HealthCheckResult> {
        self.request_probe_with(ids, &CancelToken::new()).await
    }

    /// Probe the given nodes, stopping early if `cancel` fires
    pub async fn request_probe_with(
        &self,
        ids: &[NodeId],
        cancel: &CancelToken,
    ) -> HashMap<NodeId, HealthCheckResult> {
        self.prober.probe_ids(ids, self.probe_options, cancel).await
    }

    /// Probe every live node in the catalog
    pub async fn probe_catalog(&self, cancel: &CancelToken) -> HashMap<NodeId, HealthCheckResult> {
        self.prober.probe_all(self.probe_options, cancel).await
    }

    /// Refresh the catalog from `source`
    ///
    /// A failed refresh leaves the catalog untouched and is reported as a
    /// warning.
    pub async fn refresh_catalog(&self, source: &dyn CatalogSource) -> Result<RefreshResult, EngineError> {
        match self.registry.refresh(source).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Catalog refresh failed, keeping current catalog: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AnonymityLevel, NodeStatus, ProxyNode, ProxyProtocol};
    use crate::probe::{ProbeError, ProbeSuccess};
    use async_trait::async_trait;

    /// Probe that never answers for host "hang" and succeeds otherwise
    struct HangProbe;

    #[async_trait]
    impl NodeProbe for HangProbe {
        async fn check(&self, node: &ProxyNode) -> Result<ProbeSuccess, ProbeError> {
            if node.host == "hang" {
                std::future::pending::<()>().await;
            }
            Ok(ProbeSuccess {
                latency_ms: 20,
                observed_anonymity: Some(node.anonymity),
                observed_country: Some(node.country_code.clone()),
            })
        }
    }

    struct UnreachableSource;

    #[async_trait]
    impl CatalogSource for UnreachableSource {
        fn name(&self) -> String {
            "unreachable".to_string()
        }

        async fn fetch(&self) -> Result<CatalogFile, RegistryError> {
            Err(RegistryError::SourceUnavailable("no route to host".into()))
        }
    }

    fn node(id: &str, protocol: ProxyProtocol, country: &str, status: NodeStatus) -> ProxyNode {
        ProxyNode::new(id, format!("{}.proxy.test", id), 1080, protocol, country, AnonymityLevel::Elite)
            .with_status(status)
    }

    /// Two healthy nodes (SOCKS5/US, HTTPS/DE) and three unhealthy ones
    fn five_node_catalog() -> CatalogFile {
        CatalogFile {
            nodes: vec![
                node("us-socks", ProxyProtocol::Socks5, "US", NodeStatus::Healthy),
                node("de-https", ProxyProtocol::Https, "DE", NodeStatus::Healthy),
                node("fr-socks", ProxyProtocol::Socks5, "FR", NodeStatus::Unhealthy),
                node("nl-http", ProxyProtocol::Http, "NL", NodeStatus::Unhealthy),
                node("gb-socks4", ProxyProtocol::Socks4, "GB", NodeStatus::Unhealthy),
            ],
            tor_regions: CatalogFile::seed().tor_regions,
        }
    }

    fn engine(catalog: CatalogFile, config: &EngineConfig) -> ChainEngine {
        let registry = Arc::new(ProxyRegistry::new(catalog));
        ChainEngine::new(registry, Arc::new(HangProbe), config).unwrap()
    }

    fn countries(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_maximum_three_hops_insufficient() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());

        let result = engine.request_chain(3, &[], Some(SecurityLevel::Maximum), None);

        assert_eq!(
            result.unwrap_err(),
            EngineError::Chain(ChainError::InsufficientHealthyNodes {
                required: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_maximum_two_hops_in_country_order() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());

        let descriptor = engine
            .request_chain(2, &countries(&["US", "DE"]), Some(SecurityLevel::Maximum), None)
            .unwrap();

        assert_eq!(
            descriptor.proxy_uris,
            vec!["socks5://us-socks.proxy.test:1080", "https://de-https.proxy.test:1080"]
        );
        assert!(descriptor.tor_directive.is_some());
        assert!(!descriptor.degraded);
        assert!(!descriptor.pac_script.contains("DIRECT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_marks_unhealthy() {
        let catalog = CatalogFile {
            nodes: vec![ProxyNode::new("stuck", "hang", 8080, ProxyProtocol::Http, "US", AnonymityLevel::Anonymous)],
            tor_regions: Vec::new(),
        };
        let engine = engine(catalog, &EngineConfig::default());
        let id = NodeId::from("stuck");
        assert_eq!(engine.registry().node(&id).unwrap().status, NodeStatus::Untested);

        let results = engine.request_probe(&[id.clone()]).await;

        let json = serde_json::to_value(&results[&id]).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Timeout");
        assert_eq!(engine.registry().node(&id).unwrap().status, NodeStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_refresh_unreachable_keeps_catalog() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());
        let before = serde_json::to_string(&engine.registry().list_nodes()).unwrap();

        let result = engine.refresh_catalog(&UnreachableSource).await;

        assert!(matches!(
            result,
            Err(EngineError::Registry(RegistryError::SourceUnavailable(_)))
        ));
        let after = serde_json::to_string(&engine.registry().list_nodes()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_health_gate_under_high_and_maximum() {
        let catalog = CatalogFile {
            nodes: vec![
                node("a", ProxyProtocol::Socks5, "US", NodeStatus::Healthy),
                node("b", ProxyProtocol::Socks5, "DE", NodeStatus::Untested),
                node("c", ProxyProtocol::Socks5, "NL", NodeStatus::Healthy),
                node("d", ProxyProtocol::Http, "US", NodeStatus::Unhealthy),
                node("e", ProxyProtocol::Https, "SE", NodeStatus::Healthy),
                node("f", ProxyProtocol::Socks4, "DE", NodeStatus::Untested),
                node("g", ProxyProtocol::Http, "FR", NodeStatus::Healthy),
            ],
            tor_regions: CatalogFile::seed().tor_regions,
        };
        let healthy: Vec<String> = catalog
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Healthy)
            .map(|n| n.uri())
            .collect();
        let orders = [
            countries(&[]),
            countries(&["DE", "US"]),
            countries(&["DE", "NL", "SE"]),
            countries(&["FR", "US"]),
        ];

        for seed in 0..8 {
            let mut config = EngineConfig::default();
            config.chain.seed = seed;
            let engine = engine(catalog.clone(), &config);

            for level in [SecurityLevel::High, SecurityLevel::Maximum] {
                for hops in 1..=3 {
                    for order in &orders {
                        if let Ok(descriptor) = engine.request_chain(hops, order, Some(level), None) {
                            assert!(descriptor.proxy_uris.len() >= 2);
                            assert!(descriptor.proxy_uris.iter().all(|uri| healthy.contains(uri)));
                            assert!(descriptor.tor_directive.is_some());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_low_level_allows_direct_and_untested() {
        let catalog = CatalogFile {
            nodes: vec![node("fresh", ProxyProtocol::Http, "US", NodeStatus::Untested)],
            tor_regions: CatalogFile::seed().tor_regions,
        };
        let engine = engine(catalog, &EngineConfig::default());

        let descriptor = engine.request_chain(1, &[], Some(SecurityLevel::Low), None).unwrap();
        assert_eq!(descriptor.proxy_uris.len(), 1);
        assert!(descriptor.tor_directive.is_none());
        assert!(descriptor.pac_script.contains("; DIRECT"));
        assert!(!descriptor.hardening_flags.block_scripts);
    }

    #[test]
    fn test_tor_region_and_strict_exit() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());
        let order = countries(&["US", "DE"]);

        let descriptor = engine
            .request_chain(2, &order, Some(SecurityLevel::Maximum), Some("SE"))
            .unwrap();
        let tor = descriptor.tor_directive.as_ref().unwrap();
        assert_eq!(tor.exit_region, "se");
        assert!(tor.strict_nodes);
        assert_eq!(descriptor.torrc, vec!["ExitNodes {se}".to_string(), "StrictNodes 1".to_string()]);

        let descriptor = engine
            .request_chain(2, &order, Some(SecurityLevel::High), Some("se"))
            .unwrap();
        assert!(!descriptor.tor_directive.unwrap().strict_nodes);

        let result = engine.request_chain(2, &order, Some(SecurityLevel::High), Some("atlantis"));
        assert_eq!(
            result.unwrap_err(),
            EngineError::Tor(TorError::UnknownRegion("atlantis".to_string()))
        );
    }

    #[test]
    fn test_selected_level_is_default() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());
        assert_eq!(engine.security_level(), SecurityLevel::Medium);

        // Medium: no Tor, no gate
        let descriptor = engine.request_chain(1, &countries(&["US"]), None, None).unwrap();
        assert!(descriptor.tor_directive.is_none());

        assert_eq!(engine.select_level(SecurityLevel::Maximum), SecurityLevel::Medium);
        let descriptor = engine.request_chain(1, &countries(&["US", "DE"]), None, None).unwrap();
        assert_eq!(descriptor.proxy_uris.len(), 2);
        assert!(descriptor.tor_directive.is_some());
    }

    #[test]
    fn test_best_effort_degrades() {
        let mut config = EngineConfig::default();
        config.chain.best_effort = true;
        let engine = engine(five_node_catalog(), &config);

        let descriptor = engine
            .request_chain(3, &countries(&["US", "DE"]), Some(SecurityLevel::Maximum), None)
            .unwrap();
        assert!(descriptor.degraded);
        assert_eq!(descriptor.proxy_uris.len(), 2);
    }

    #[test]
    fn test_config_rejects_unknown_tor_region() {
        let config = EngineConfig {
            tor_region: Some("zz".into()),
            ..EngineConfig::default()
        };
        let registry = Arc::new(ProxyRegistry::with_seed());

        let result = ChainEngine::new(registry, Arc::new(HangProbe), &config);
        assert!(matches!(result, Err(EngineError::Tor(TorError::UnknownRegion(_)))));
    }

    #[tokio::test]
    async fn test_probe_then_build_under_gate() {
        let catalog = CatalogFile {
            nodes: vec![
                node("s1", ProxyProtocol::Socks5, "US", NodeStatus::Untested),
                node("s2", ProxyProtocol::Socks5, "DE", NodeStatus::Untested),
            ],
            tor_regions: CatalogFile::seed().tor_regions,
        };
        let mut config = EngineConfig::default();
        config.probe.timeout_ms = 500;
        let engine = engine(catalog, &config);

        // Nothing tested yet
        assert!(engine.request_chain(2, &[], Some(SecurityLevel::High), None).is_err());

        let results = engine.probe_catalog(&CancelToken::new()).await;
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.success));

        let descriptor = engine.request_chain(2, &[], Some(SecurityLevel::High), None).unwrap();
        assert_eq!(descriptor.proxy_uris.len(), 2);
        assert!(descriptor.tor_directive.unwrap().is_auto());
    }

    #[test]
    fn test_zero_hops_rejected_at_every_level() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());

        for level in SecurityLevel::all() {
            let result = engine.request_chain(0, &[], Some(*level), None);
            assert_eq!(result.unwrap_err(), EngineError::Policy(PolicyError::NoHops));
        }
        assert_eq!(
            engine.request_chain(0, &countries(&["US"]), None, None).unwrap_err(),
            EngineError::Policy(PolicyError::NoHops)
        );
    }

    #[test]
    fn test_auto_exit_serializes_as_string() {
        let engine = engine(five_node_catalog(), &EngineConfig::default());

        let descriptor = engine.request_chain(2, &[], Some(SecurityLevel::Maximum), None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&descriptor.to_json().unwrap()).unwrap();

        assert_eq!(json["torDirective"]["exitRegion"], AUTO_REGION);
        assert_eq!(json["torDirective"]["strictNodes"], false);
    }

    #[tokio::test]
    async fn test_injected_host_kept_out_of_routes() {
        let mut catalog = five_node_catalog();
        catalog.nodes.push(
            ProxyNode::new("evil", "1.2.3.4:80\", \"DIRECT", 8080, ProxyProtocol::Http, "US", AnonymityLevel::Elite)
                .with_status(NodeStatus::Healthy),
        );
        let engine = engine(catalog.clone(), &EngineConfig::default());
        assert!(engine.registry().node(&NodeId::from("evil")).is_none());

        for hops in 1..=2 {
            let descriptor = engine
                .request_chain(hops, &countries(&["US"]), Some(SecurityLevel::Medium), None)
                .unwrap();
            assert!(!descriptor.pac_script.contains("DIRECT"));
            assert_eq!(descriptor.decode_uris().unwrap(), descriptor.decode_pac().unwrap());
        }

        let result = engine.refresh_catalog(&crate::registry::StaticSource::new(catalog)).await;
        assert!(matches!(result, Err(EngineError::Registry(RegistryError::Parse(_)))));
    }

    #[test]
    fn test_presets_checked_against_level() {
        let engine = engine(CatalogFile::seed(), &EngineConfig::default());
        assert_eq!(engine.presets().len(), 5);

        let basic = engine.request_preset("chain1", Some(SecurityLevel::Low), None).unwrap();
        assert_eq!(basic.proxy_uris, vec!["http://8.210.7.146:3128"]);

        let mixed = engine.request_preset("CHAIN4", Some(SecurityLevel::Medium), None).unwrap();
        assert_eq!(
            mixed.proxy_uris,
            vec!["socks5://184.178.172.25:15291", "https://103.159.46.2:3128"]
        );

        for broken in ["chain2", "chain3", "chain5"] {
            let result = engine.request_preset(broken, Some(SecurityLevel::Low), None);
            assert!(
                matches!(result, Err(EngineError::Chain(ChainError::Invalid(_)))),
                "{}",
                broken
            );
        }

        assert!(matches!(
            engine.request_preset("chain9", None, None),
            Err(EngineError::Chain(ChainError::InvalidRequest(_)))
        ));
        // Below the hop floor
        assert!(matches!(
            engine.request_preset("chain1", Some(SecurityLevel::High), None),
            Err(EngineError::Chain(ChainError::InvalidRequest(_)))
        ));
        // proxy7 is only Anonymous
        assert!(matches!(
            engine.request_preset("chain4", Some(SecurityLevel::Maximum), None),
            Err(EngineError::Chain(ChainError::InvalidRequest(_)))
        ));
        // Seed nodes are untested, so the gate rejects them
        assert!(matches!(
            engine.request_preset("chain4", Some(SecurityLevel::High), None),
            Err(EngineError::Emit(EmitError::Rejected(_)))
        ));
    }
}
