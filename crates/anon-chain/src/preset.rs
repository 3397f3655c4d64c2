//! Named Chain Presets
//!
//! A preset pins a chain to specific catalog nodes, in order. Presets are
//! checked against the catalog every time they are used: a preset whose
//! hops break the protocol transition table resolves to
//! [`ChainError::Invalid`] rather than being hidden.

use crate::chain::{Chain, ChainError};
use crate::node::{NodeId, NodeStatus};
use crate::registry::CatalogSnapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named, fixed hop order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPreset {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Node IDs, client side first
    pub hops: Vec<NodeId>,
}

impl ChainPreset {
    pub fn new(id: &str, name: &str, description: &str, hops: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            hops: hops.iter().map(|h| NodeId::from(*h)).collect(),
        }
    }

    /// Presets over the built-in seed catalog
    ///
    /// Only `chain1` and `chain4` follow the transition table; the others
    /// put an HTTP hop in front of an HTTPS or SOCKS hop.
    pub fn builtin() -> Vec<ChainPreset> {
        vec![
            ChainPreset::new("chain1", "Basic Chain", "Single proxy for basic anonymity", &["proxy1"]),
            ChainPreset::new("chain2", "Double Hop", "Two proxies for enhanced privacy", &["proxy3", "proxy6"]),
            ChainPreset::new(
                "chain3",
                "Triple Chain",
                "Three proxies for maximum anonymity",
                &["proxy8", "proxy5", "proxy6"],
            ),
            ChainPreset::new(
                "chain4",
                "Mixed Protocol",
                "SOCKS5 + HTTPS for protocol diversity",
                &["proxy9", "proxy7"],
            ),
            ChainPreset::new(
                "chain5",
                "Global Route",
                "Multi-country routing for geo-diversity",
                &["proxy2", "proxy4", "proxy10"],
            ),
        ]
    }

    /// Turn the preset into a chain over `snapshot`
    ///
    /// Every hop must exist and not be expired; the hop order must satisfy
    /// the chain invariants.
    pub fn resolve(&self, snapshot: &CatalogSnapshot) -> Result<Chain, ChainError> {
        let mut hops = Vec::with_capacity(self.hops.len());
        for id in &self.hops {
            let node = snapshot
                .node(id)
                .filter(|n| n.status != NodeStatus::Expired)
                .ok_or_else(|| {
                    ChainError::InvalidRequest(format!("preset {} names unknown node {}", self.id, id))
                })?;
            hops.push(node.clone());
        }

        let chain = Chain::from_hops(hops)?;
        debug!("Preset {} resolved to {:?}", self.id, chain.node_ids());
        Ok(chain)
    }
}
