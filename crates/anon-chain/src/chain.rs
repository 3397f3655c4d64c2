//! Chain Builder
//!
//! Assembles an ordered chain of 1-3 proxy hops from a catalog snapshot.
//!
//! # Algorithm
//!
//! 1. Drop expired and unhealthy nodes, nodes of the wrong protocol, nodes
//!    below the anonymity floor and, behind a health gate, anything not
//!    `Healthy`
//! 2. Rank: preferred-country position, then status, then latency. Ties
//!    are broken by a shuffle from an RNG seeded per build
//! 3. Walk the ranking depth-first, skipping a candidate that repeats a
//!    node or cannot follow the previous hop, and keep the first chain that
//!    reaches the target length
//! 4. Short of `min_hops`: fail, unless the caller asked for best effort,
//!    in which case the longest chain found comes back tagged `degraded`
//!
//! The builder never mutates nodes and depends only on its inputs, so the
//! same snapshot and request always give the same chain.

use crate::node::{AnonymityLevel, NodeId, NodeStatus, ProxyNode, ProxyProtocol};
use crate::policy::MAX_HOPS;
use crate::registry::CatalogSnapshot;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What to do when the policy floor cannot be met
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Fail rather than weaken the declared guarantee
    #[default]
    Strict,
    /// Return the longest valid chain, tagged degraded
    BestEffort,
}

/// Chain build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRequest {
    /// Number of hops wanted
    pub desired_hops: usize,
    /// Fewest hops acceptable
    pub min_hops: usize,
    /// Country codes in order of preference
    pub preferred_countries: Vec<String>,
    /// Only use nodes speaking this protocol
    pub protocol_constraint: Option<ProxyProtocol>,
    /// Only `Healthy` nodes qualify
    pub requires_health_gate: bool,
    /// Tor must wrap the chain (handled by the caller, carried for emission)
    pub requires_tor: bool,
    pub min_anonymity: AnonymityLevel,
    pub mode: BuildMode,
}

impl ChainRequest {
    /// Request exactly `desired_hops` hops
    pub fn new(desired_hops: usize) -> Self {
        Self {
            desired_hops,
            min_hops: desired_hops,
            preferred_countries: Vec::new(),
            protocol_constraint: None,
            requires_health_gate: false,
            requires_tor: false,
            min_anonymity: AnonymityLevel::Transparent,
            mode: BuildMode::Strict,
        }
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.preferred_countries = countries
            .into_iter()
            .map(|c| c.as_ref().trim().to_uppercase())
            .collect();
        self
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol_constraint = Some(protocol);
        self
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Hops the builder aims for
    fn target_hops(&self) -> usize {
        self.desired_hops.max(self.min_hops)
    }
}

/// A broken chain invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainViolation {
    #[error("chain has no hops")]
    Empty,

    #[error("chain has {0} hops, more than 3")]
    TooLong(usize),

    #[error("node {0} appears twice")]
    DuplicateNode(NodeId),

    #[error("{from_protocol} hop {from} cannot carry {to_protocol} hop {to}")]
    IllegalTransition {
        from: NodeId,
        from_protocol: ProxyProtocol,
        to: NodeId,
        to_protocol: ProxyProtocol,
    },

    #[error("node {0} is not healthy")]
    UnhealthyNode(NodeId),
}

/// Ordered chain of proxy hops, client side first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chain {
    hops: Vec<ProxyNode>,
    degraded: bool,
}

impl Chain {
    /// Build a chain from hops, checking every structural invariant
    pub fn from_hops(hops: Vec<ProxyNode>) -> Result<Self, ChainViolation> {
        validate_hops(&hops)?;
        Ok(Self {
            hops,
            degraded: false,
        })
    }

    pub fn hops(&self) -> &[ProxyNode] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Shorter than the policy asked for
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.hops.iter().map(|n| n.id.clone()).collect()
    }

    /// Structural invariants plus, when gated, health of every hop
    pub fn check(&self, health_gate: bool) -> Result<(), ChainViolation> {
        validate_hops(&self.hops)?;
        if health_gate {
            if let Some(node) = self.hops.iter().find(|n| !n.is_healthy()) {
                return Err(ChainViolation::UnhealthyNode(node.id.clone()));
            }
        }
        Ok(())
    }
}

fn validate_hops(hops: &[ProxyNode]) -> Result<(), ChainViolation> {
    if hops.is_empty() {
        return Err(ChainViolation::Empty);
    }
    if hops.len() > MAX_HOPS {
        return Err(ChainViolation::TooLong(hops.len()));
    }

    let mut seen = HashSet::new();
    for node in hops {
        if !seen.insert(&node.id) {
            return Err(ChainViolation::DuplicateNode(node.id.clone()));
        }
    }

    for pair in hops.windows(2) {
        if !pair[0].protocol.can_precede(pair[1].protocol) {
            return Err(ChainViolation::IllegalTransition {
                from: pair[0].id.clone(),
                from_protocol: pair[0].protocol,
                to: pair[1].id.clone(),
                to_protocol: pair[1].protocol,
            });
        }
    }
    Ok(())
}

/// Chain builder errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Not enough healthy nodes: need {required} hops, found {available}")]
    InsufficientHealthyNodes { required: usize, available: usize },

    #[error("Chain invariant violated: {0}")]
    Invalid(#[from] ChainViolation),

    #[error("Invalid chain request: {0}")]
    InvalidRequest(String),
}

/// Chain builder
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainBuilder {
    seed: u64,
}

impl ChainBuilder {
    /// Create a builder whose tie-breaking is driven by `seed`
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Build a chain from a catalog snapshot
    pub fn build(&self, snapshot: &CatalogSnapshot, request: &ChainRequest) -> Result<Chain, ChainError> {
        let target = request.target_hops();
        let min_hops = request.min_hops.max(1);

        if request.desired_hops == 0 {
            return Err(ChainError::InvalidRequest("at least one hop is required".into()));
        }
        if target > MAX_HOPS {
            return Err(ChainError::InvalidRequest(format!(
                "{} hops requested, at most {} supported",
                target, MAX_HOPS
            )));
        }

        let candidates = self.rank_candidates(snapshot, request);
        debug!(
            "Building {}-hop chain from {} candidates (generation {})",
            target,
            candidates.len(),
            snapshot.generation()
        );

        let mut search = Search {
            candidates: &candidates,
            target,
            path: Vec::with_capacity(target),
            best: Vec::new(),
        };
        let found = search.run();
        let hops: Vec<ProxyNode> = found.into_iter().map(|i| candidates[i].clone()).collect();

        let degraded = if hops.len() >= min_hops {
            false
        } else if request.mode == BuildMode::BestEffort && !hops.is_empty() {
            warn!(
                "Returning degraded {}-hop chain, policy asks for {}",
                hops.len(),
                min_hops
            );
            true
        } else {
            warn!(
                "Cannot assemble {} hops from {} candidates (best: {})",
                min_hops,
                candidates.len(),
                hops.len()
            );
            return Err(ChainError::InsufficientHealthyNodes {
                required: min_hops,
                available: hops.len(),
            });
        };

        let mut chain = Chain::from_hops(hops).map_err(|violation| {
            error!("Chain invariant violated after assembly: {}", violation);
            ChainError::Invalid(violation)
        })?;
        chain.degraded = degraded;

        if let Err(violation) = chain.check(request.requires_health_gate) {
            error!("Chain invariant violated after assembly: {}", violation);
            return Err(ChainError::Invalid(violation));
        }

        debug!("Built chain: {:?}", chain.node_ids());
        Ok(chain)
    }

    /// Eligible nodes, best first
    fn rank_candidates<'a>(&self, snapshot: &'a CatalogSnapshot, request: &ChainRequest) -> Vec<&'a ProxyNode> {
        let mut candidates: Vec<&ProxyNode> = snapshot
            .nodes()
            .iter()
            .map(Arc::as_ref)
            .filter(|n| !matches!(n.status, NodeStatus::Expired | NodeStatus::Unhealthy))
            .filter(|n| !request.requires_health_gate || n.is_healthy())
            .filter(|n| request.protocol_constraint.is_none_or(|p| n.protocol == p))
            .filter(|n| n.effective_anonymity() >= request.min_anonymity)
            .collect();

        // Catalog order must not leak into the result
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        let mut rng = StdRng::seed_from_u64(self.seed);
        candidates.shuffle(&mut rng);

        let country_rank = |node: &ProxyNode| {
            request
                .preferred_countries
                .iter()
                .position(|c| node.in_country(c))
                .unwrap_or(request.preferred_countries.len())
        };
        candidates.sort_by_key(|n| {
            (
                country_rank(n),
                n.status.rank(),
                n.last_latency_ms.unwrap_or(u32::MAX),
            )
        });

        candidates
    }
}

/// Depth-first walk over ranked candidates
struct Search<'a> {
    candidates: &'a [&'a ProxyNode],
    target: usize,
    path: Vec<usize>,
    best: Vec<usize>,
}

impl Search<'_> {
    /// First chain of `target` hops in rank order, else the longest seen
    fn run(&mut self) -> Vec<usize> {
        self.extend();
        std::mem::take(&mut self.best)
    }

    /// Returns true once a full-length chain is in `best`
    fn extend(&mut self) -> bool {
        if self.path.len() > self.best.len() {
            self.best = self.path.clone();
        }
        if self.path.len() == self.target {
            return true;
        }

        for index in 0..self.candidates.len() {
            if self.path.contains(&index) {
                continue;
            }
            let node = self.candidates[index];
            if self.path.iter().any(|&i| self.candidates[i].id == node.id) {
                continue;
            }
            if let Some(&last) = self.path.last() {
                if !self.candidates[last].protocol.can_precede(node.protocol) {
                    continue;
                }
            }

            self.path.push(index);
            if self.extend() {
                return true;
            }
            self.path.pop();
        }
        false
    }
}
