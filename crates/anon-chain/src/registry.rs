//! Proxy Registry
//!
//! Holds the catalog of proxy nodes and Tor exit regions.
//!
//! # Consistency
//!
//! The catalog lives behind an `Arc` that is swapped wholesale on every
//! write (refresh or health update). Readers take a [`CatalogSnapshot`] and
//! keep working on it; a concurrent write produces a new snapshot instead of
//! changing the one being read, so a chain can never mix pre- and
//! post-refresh nodes.
//!
//! Nodes are shared between snapshots by `Arc`, so a health write copies
//! pointers and clones only the nodes it touches.
//!
//! # Validation
//!
//! A node must carry a DNS name or IP literal and a non-zero port. Bad
//! entries are dropped with a warning when a registry is created, and make
//! a refresh fail with [`RegistryError::Parse`].

use crate::config::CatalogFile;
use crate::node::{NodeId, NodeStatus, ProxyNode, ProxyProtocol, TorExitRegion};
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Immutable view of the catalog at one point in time
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    generation: u64,
    nodes: Vec<Arc<ProxyNode>>,
    tor_regions: Vec<TorExitRegion>,
}

impl CatalogSnapshot {
    /// Write counter; bumps on every refresh or health update
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nodes(&self) -> &[Arc<ProxyNode>] {
        &self.nodes
    }

    pub fn tor_regions(&self) -> &[TorExitRegion] {
        &self.tor_regions
    }

    /// Find a node by ID
    pub fn node(&self, id: &NodeId) -> Option<&ProxyNode> {
        self.nodes.iter().map(Arc::as_ref).find(|n| &n.id == id)
    }

    /// Find a Tor exit region by country code (case-insensitive)
    pub fn tor_region(&self, code: &str) -> Option<&TorExitRegion> {
        self.tor_regions
            .iter()
            .find(|r| r.country_code.eq_ignore_ascii_case(code))
    }

    /// Non-expired nodes in a country
    pub fn find_by_country(&self, code: &str) -> Vec<&ProxyNode> {
        self.live_nodes().filter(|n| n.in_country(code)).collect()
    }

    /// Non-expired nodes speaking a protocol
    pub fn find_by_protocol(&self, protocol: ProxyProtocol) -> Vec<&ProxyNode> {
        self.live_nodes().filter(|n| n.protocol == protocol).collect()
    }

    /// Pick a random usable node, optionally restricted to one protocol
    ///
    /// Healthy and untested nodes qualify. The caller owns the random
    /// source, so a seeded RNG gives a reproducible pick.
    pub fn random_node<R: Rng + ?Sized>(
        &self,
        protocol: Option<ProxyProtocol>,
        rng: &mut R,
    ) -> Option<&ProxyNode> {
        let candidates: Vec<&ProxyNode> = self
            .live_nodes()
            .filter(|n| matches!(n.status, NodeStatus::Healthy | NodeStatus::Untested))
            .filter(|n| protocol.is_none_or(|p| n.protocol == p))
            .collect();

        if candidates.is_empty() {
            return None;
        }
        Some(candidates[rng.gen_range(0..candidates.len())])
    }

    fn live_nodes(&self) -> impl Iterator<Item = &ProxyNode> {
        self.nodes
            .iter()
            .map(Arc::as_ref)
            .filter(|n| n.status != NodeStatus::Expired)
    }
}

/// Outcome of a catalog refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    /// Source the catalog came from
    pub source: String,
    /// Nodes seen for the first time
    pub added: usize,
    /// Nodes that reappeared and kept their health data
    pub retained: usize,
    /// Nodes missing from the source, now marked expired
    pub expired: Vec<NodeId>,
    /// Expired nodes that were still missing and got dropped
    pub dropped: Vec<NodeId>,
    /// Generation of the new catalog
    pub generation: u64,
}

/// An external supplier of catalog entries
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Name used in logs and refresh results
    fn name(&self) -> String;

    /// Fetch the full catalog
    async fn fetch(&self) -> Result<CatalogFile, RegistryError>;
}

/// In-memory catalog source
#[derive(Debug, Clone)]
pub struct StaticSource {
    catalog: CatalogFile,
}

impl StaticSource {
    pub fn new(catalog: CatalogFile) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl CatalogSource for StaticSource {
    fn name(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self) -> Result<CatalogFile, RegistryError> {
        Ok(self.catalog.clone())
    }
}

/// Catalog file on disk (TOML or JSON)
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<CatalogFile, RegistryError> {
        let format = crate::config::ConfigFormat::from_path(&self.path)
            .map_err(|e| RegistryError::Parse(e.to_string()))?;
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RegistryError::SourceUnavailable(format!("{}: {}", self.name(), e)))?;
        CatalogFile::from_str_format(&content, format)
            .map_err(|e| RegistryError::Parse(e.to_string()))
    }
}

/// Proxy registry
///
/// Single writer at a time, any number of readers.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    catalog: RwLock<Arc<CatalogSnapshot>>,
}

impl ProxyRegistry {
    /// Create a registry from a catalog
    pub fn new(catalog: CatalogFile) -> Self {
        let CatalogFile { nodes, tor_regions } = catalog;
        let (nodes, duplicates) = dedupe(nodes);
        if !duplicates.is_empty() {
            warn!("Ignoring duplicate node IDs in catalog: {:?}", duplicates);
        }
        let (nodes, invalid): (Vec<ProxyNode>, Vec<ProxyNode>) =
            nodes.into_iter().partition(ProxyNode::has_valid_address);
        if !invalid.is_empty() {
            let ids: Vec<&NodeId> = invalid.iter().map(|n| &n.id).collect();
            warn!("Ignoring catalog nodes with invalid addresses: {:?}", ids);
        }

        info!(
            "Proxy registry loaded ({} nodes, {} Tor regions)",
            nodes.len(),
            tor_regions.len()
        );

        Self {
            catalog: RwLock::new(Arc::new(CatalogSnapshot {
                generation: 0,
                nodes: nodes.into_iter().map(|n| Arc::new(normalize_node(n))).collect(),
                tor_regions: tor_regions.into_iter().map(normalize_region).collect(),
            })),
        }
    }

    /// Create a registry from the built-in seed catalog
    pub fn with_seed() -> Self {
        Self::new(CatalogFile::seed())
    }

    /// Take a consistent snapshot of the catalog
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All known nodes, including expired ones
    pub fn list_nodes(&self) -> Vec<ProxyNode> {
        self.snapshot()
            .nodes
            .iter()
            .map(|n| ProxyNode::clone(n))
            .collect()
    }

    /// All Tor exit regions
    pub fn list_tor_regions(&self) -> Vec<TorExitRegion> {
        self.snapshot().tor_regions.clone()
    }

    /// Look up one node
    pub fn node(&self, id: &NodeId) -> Option<ProxyNode> {
        self.snapshot().node(id).cloned()
    }

    /// Replace the catalog with a fresh one from `source`
    ///
    /// Health data survives for nodes whose ID reappears. Nodes missing
    /// from the source are marked expired; ones already expired are
    /// dropped. If the source fails, or lists a node with an invalid
    /// address, nothing changes.
    pub async fn refresh(&self, source: &dyn CatalogSource) -> Result<RefreshResult, RegistryError> {
        let name = source.name();
        debug!("Refreshing catalog from {}", name);

        let fresh = match source.fetch().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Catalog refresh from {} failed, keeping current catalog: {}", name, e);
                return Err(e);
            }
        };

        if let Some(bad) = fresh.nodes.iter().find(|n| !n.has_valid_address()) {
            warn!(
                "Catalog refresh from {} rejected, node {} has invalid address {:?}:{}",
                name, bad.id, bad.host, bad.port
            );
            return Err(RegistryError::Parse(format!(
                "node {} has an invalid address: {:?} port {}",
                bad.id, bad.host, bad.port
            )));
        }

        let mut guard = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let current = guard.clone();

        let (fresh_nodes, duplicates) = dedupe(fresh.nodes);
        if !duplicates.is_empty() {
            warn!("Ignoring duplicate node IDs from {}: {:?}", name, duplicates);
        }

        let previous: HashMap<&NodeId, &ProxyNode> =
            current.nodes.iter().map(|n| (&n.id, n.as_ref())).collect();
        let fresh_ids: HashSet<NodeId> = fresh_nodes.iter().map(|n| n.id.clone()).collect();

        let mut added = 0;
        let mut retained = 0;
        let mut nodes = Vec::with_capacity(fresh_nodes.len());

        for node in fresh_nodes {
            let mut node = normalize_node(node);
            match previous.get(&node.id) {
                Some(old) if old.status != NodeStatus::Expired => {
                    node.status = old.status;
                    node.last_latency_ms = old.last_latency_ms;
                    node.last_checked_at = old.last_checked_at;
                    node.observed_anonymity = old.observed_anonymity;
                    node.observed_country = old.observed_country.clone();
                    retained += 1;
                }
                Some(_) => {
                    // Back from expiry; old health data is stale
                    node.status = NodeStatus::Untested;
                    retained += 1;
                }
                None => {
                    node.status = NodeStatus::Untested;
                    added += 1;
                }
            }
            nodes.push(Arc::new(node));
        }

        let mut expired = Vec::new();
        let mut dropped = Vec::new();
        for old in current.nodes.iter().filter(|n| !fresh_ids.contains(&n.id)) {
            if old.status == NodeStatus::Expired {
                dropped.push(old.id.clone());
            } else {
                let mut node = ProxyNode::clone(old);
                node.status = NodeStatus::Expired;
                expired.push(node.id.clone());
                nodes.push(Arc::new(node));
            }
        }

        // A proxy-only source leaves the Tor regions alone
        let tor_regions = if fresh.tor_regions.is_empty() {
            current.tor_regions.clone()
        } else {
            fresh.tor_regions.into_iter().map(normalize_region).collect()
        };

        let generation = current.generation + 1;
        *guard = Arc::new(CatalogSnapshot {
            generation,
            nodes,
            tor_regions,
        });

        info!(
            "Catalog refreshed from {} ({} added, {} retained, {} expired, {} dropped)",
            name,
            added,
            retained,
            expired.len(),
            dropped.len()
        );

        Ok(RefreshResult {
            source: name,
            added,
            retained,
            expired,
            dropped,
            generation,
        })
    }

    /// Apply in-place edits to the nodes named in `ids`
    ///
    /// IDs no longer in the catalog (or expired by a refresh since) are
    /// skipped. Untouched nodes stay shared with the previous snapshot.
    /// Returns the number of nodes touched.
    pub(crate) fn update_nodes<F>(&self, ids: &HashSet<NodeId>, mut update: F) -> usize
    where
        F: FnMut(&mut ProxyNode),
    {
        if ids.is_empty() {
            return 0;
        }

        let mut guard = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = CatalogSnapshot::clone(&guard);

        let mut touched = 0;
        for node in next
            .nodes
            .iter_mut()
            .filter(|n| n.status != NodeStatus::Expired && ids.contains(&n.id))
        {
            update(Arc::make_mut(node));
            touched += 1;
        }

        if touched > 0 {
            next.generation += 1;
            *guard = Arc::new(next);
        }
        touched
    }
}

fn normalize_node(mut node: ProxyNode) -> ProxyNode {
    node.country_code = node.country_code.to_uppercase();
    node
}

fn normalize_region(mut region: TorExitRegion) -> TorExitRegion {
    region.country_code = region.country_code.to_lowercase();
    region
}

/// Keep the first node for each ID
fn dedupe(nodes: Vec<ProxyNode>) -> (Vec<ProxyNode>, Vec<NodeId>) {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    let mut unique = Vec::with_capacity(nodes.len());

    for node in nodes {
        if seen.insert(node.id.clone()) {
            unique.push(node);
        } else {
            duplicates.push(node.id);
        }
    }
    (unique, duplicates)
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Catalog source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Catalog parse error: {0}")]
    Parse(String),
}
