//! Anon Chain - Proxy and Tor Routing Engine
//!
//! Catalogs proxy nodes, probes them concurrently, assembles multi-hop
//! chains under a security level and describes the result for an external
//! browser launcher.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         ChainEngine                            │
//! │                                                                │
//! │  ┌───────────────┐  probe   ┌──────────────┐                   │
//! │  │ ProxyRegistry │◀────────▶│ HealthProber │──▶ TCP handshakes │
//! │  └───────┬───────┘ results  └──────────────┘                   │
//! │          │ snapshot                                            │
//! │          ▼                                                     │
//! │  ┌───────────────┐  request  ┌──────────────────────┐          │
//! │  │ ChainBuilder  │◀──────────│ SecurityPolicyEngine │          │
//! │  └───────┬───────┘           └──────────────────────┘          │
//! │          │ chain                                               │
//! │          ▼                                                     │
//! │  ┌───────────────┐  directive ┌─────────────────┐              │
//! │  │ ConfigEmitter │◀───────────│ TorExitSelector │              │
//! │  └───────┬───────┘            └─────────────────┘              │
//! └──────────│─────────────────────────────────────────────────────┘
//!            ▼
//!   RoutingDescriptor (proxy URIs + PAC script) ──▶ browser launcher
//! ```
//!
//! # Features
//!
//! - **Protocol-aware chains**: HTTP, HTTPS, SOCKS4 and SOCKS5 hops, only in
//!   orders the protocols can actually relay
//! - **Bounded probing**: concurrent handshakes under a per-probe timeout,
//!   cancellable without leaving nodes half-updated, with an optional
//!   judge that reports what the far end actually sees
//! - **Security levels**: Low to Maximum, each a floor the caller can only
//!   raise
//! - **Deterministic**: the same snapshot, request and seed give the same
//!   chain

mod chain;
mod config;
mod emit;
mod engine;
mod judge;
mod launch;
mod node;
mod policy;
mod preset;
mod probe;
mod registry;
mod tor;

pub use chain::{BuildMode, Chain, ChainBuilder, ChainError, ChainRequest, ChainViolation};
pub use config::{CatalogFile, ChainSettings, ConfigError, ConfigFormat, EngineConfig, ProbeSettings};
pub use emit::{ConfigEmitter, EmitError, EmitFlags, HopSpec, RoutingDescriptor};
pub use engine::{ChainEngine, EngineError};
pub use judge::{JudgeEndpoint, JudgeReport};
pub use launch::{BrowserKind, DEFAULT_URL, LaunchError, LaunchPlan, RouteHandoff};
pub use node::{
    AnonymityLevel, NodeId, NodeStatus, ProxyNode, ProxyProtocol, RelativeSpeed, TorExitRegion,
};
pub use policy::{
    BrowserPreset, HardeningFlags, MAX_HOPS, PolicyConfig, PolicyError, SecurityLevel,
    SecurityPolicyEngine,
};
pub use preset::ChainPreset;
pub use probe::{
    CancelToken, HandshakeProbe, HealthCheckResult, HealthProber, NodeProbe, ProbeError,
    ProbeFailure, ProbeOptions, ProbeSuccess,
};
pub use registry::{
    CatalogSnapshot, CatalogSource, FileSource, ProxyRegistry, RefreshResult, RegistryError,
    StaticSource,
};
pub use tor::{AUTO_REGION, TorDirective, TorError, TorExitSelector};
