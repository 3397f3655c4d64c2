//! Security Policy Engine
//!
//! Maps a named security level to the shape a chain must have and to the
//! browser hardening flags that go with it.
//!
//! | Level | Min hops | Tor | Health gate | Min anonymity | Direct fallback |
//! |-------|----------|-----|-------------|---------------|-----------------|
//! | Low | 1 | no | no | Transparent | yes |
//! | Medium | 1 | no | no | Anonymous | no |
//! | High | 2 | yes | yes | Anonymous | no |
//! | Maximum | 2 | yes (strict exit) | yes | Elite | no |
//!
//! Levels only change through [`SecurityPolicyEngine::select`]; nothing in
//! the engine escalates or relaxes a level on its own.

use crate::chain::ChainRequest;
use crate::node::AnonymityLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Longest chain the builder will assemble
pub const MAX_HOPS: usize = 3;

/// Named security level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

impl SecurityLevel {
    /// Get all levels, weakest first
    pub fn all() -> &'static [SecurityLevel] {
        &[
            SecurityLevel::Low,
            SecurityLevel::Medium,
            SecurityLevel::High,
            SecurityLevel::Maximum,
        ]
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "Basic Browsing",
            SecurityLevel::Medium => "Enhanced Privacy",
            SecurityLevel::High => "Advanced Anonymity",
            SecurityLevel::Maximum => "Maximum Security",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "low",
            SecurityLevel::Medium => "medium",
            SecurityLevel::High => "high",
            SecurityLevel::Maximum => "maximum",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SecurityLevel {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityLevel::all()
            .iter()
            .copied()
            .find(|level| level.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| PolicyError::UnknownLevel(s.to_string()))
    }
}

/// Browser hardening flags handed to the launch collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardeningFlags {
    pub block_scripts: bool,
    pub block_trackers: bool,
    pub clear_cookies: bool,
}

impl HardeningFlags {
    /// Union of two flag sets (a flag set in either stays set)
    pub fn union(self, other: HardeningFlags) -> HardeningFlags {
        HardeningFlags {
            block_scripts: self.block_scripts || other.block_scripts,
            block_trackers: self.block_trackers || other.block_trackers,
            clear_cookies: self.clear_cookies || other.clear_cookies,
        }
    }
}

/// Browser preset, layered on top of a level's hardening flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserPreset {
    /// Maximum privacy: scripts off, trackers blocked, cookies cleared
    Stealth,
    /// Balanced for research: trackers blocked, scripts on
    Research,
    /// No extra hardening
    Standard,
}

impl BrowserPreset {
    pub fn all() -> &'static [BrowserPreset] {
        &[BrowserPreset::Stealth, BrowserPreset::Research, BrowserPreset::Standard]
    }

    pub fn key(&self) -> &'static str {
        match self {
            BrowserPreset::Stealth => "stealth",
            BrowserPreset::Research => "research",
            BrowserPreset::Standard => "standard",
        }
    }

    pub fn flags(&self) -> HardeningFlags {
        match self {
            BrowserPreset::Stealth => HardeningFlags {
                block_scripts: true,
                block_trackers: true,
                clear_cookies: true,
            },
            BrowserPreset::Research => HardeningFlags {
                block_scripts: false,
                block_trackers: true,
                clear_cookies: false,
            },
            BrowserPreset::Standard => HardeningFlags::default(),
        }
    }
}

impl FromStr for BrowserPreset {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BrowserPreset::all()
            .iter()
            .copied()
            .find(|preset| preset.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| PolicyError::UnknownPreset(s.to_string()))
    }
}

/// Chain-shape requirements and companion flags for one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub level: SecurityLevel,
    pub min_hops: usize,
    pub requires_tor: bool,
    pub requires_health_gate: bool,
    /// Exit must stay inside the requested Tor region
    pub strict_exit: bool,
    pub min_anonymity: AnonymityLevel,
    /// PAC script may fall back to a direct connection
    pub allow_direct_fallback: bool,
    pub hardening: HardeningFlags,
}

/// Security policy engine
///
/// Holds the level the user selected. [`resolve`](Self::resolve) and
/// [`validate_request`](Self::validate_request) are pure.
#[derive(Debug, Clone)]
pub struct SecurityPolicyEngine {
    current: SecurityLevel,
}

impl SecurityPolicyEngine {
    /// Create an engine starting at the given level
    pub fn new(initial: SecurityLevel) -> Self {
        Self { current: initial }
    }

    /// Currently selected level
    pub fn current(&self) -> SecurityLevel {
        self.current
    }

    /// Explicit user selection; the only way the level changes
    pub fn select(&mut self, level: SecurityLevel) -> SecurityLevel {
        let previous = self.current;
        if previous != level {
            info!("Security level changed: {} -> {}", previous, level);
        }
        self.current = level;
        previous
    }

    /// Look up the fixed requirements for a level
    pub fn resolve(level: SecurityLevel) -> PolicyConfig {
        match level {
            SecurityLevel::Low => PolicyConfig {
                level,
                min_hops: 1,
                requires_tor: false,
                requires_health_gate: false,
                strict_exit: false,
                min_anonymity: AnonymityLevel::Transparent,
                allow_direct_fallback: true,
                hardening: HardeningFlags {
                    block_scripts: false,
                    block_trackers: true,
                    clear_cookies: true,
                },
            },
            SecurityLevel::Medium => PolicyConfig {
                level,
                min_hops: 1,
                requires_tor: false,
                requires_health_gate: false,
                strict_exit: false,
                min_anonymity: AnonymityLevel::Anonymous,
                allow_direct_fallback: false,
                hardening: HardeningFlags {
                    block_scripts: true,
                    block_trackers: true,
                    clear_cookies: true,
                },
            },
            SecurityLevel::High => PolicyConfig {
                level,
                min_hops: 2,
                requires_tor: true,
                requires_health_gate: true,
                strict_exit: false,
                min_anonymity: AnonymityLevel::Anonymous,
                allow_direct_fallback: false,
                hardening: HardeningFlags {
                    block_scripts: true,
                    block_trackers: true,
                    clear_cookies: true,
                },
            },
            SecurityLevel::Maximum => PolicyConfig {
                level,
                min_hops: 2,
                requires_tor: true,
                requires_health_gate: true,
                strict_exit: true,
                min_anonymity: AnonymityLevel::Elite,
                allow_direct_fallback: false,
                hardening: HardeningFlags {
                    block_scripts: true,
                    block_trackers: true,
                    clear_cookies: true,
                },
            },
        }
    }

    /// Requirements for the currently selected level
    pub fn current_policy(&self) -> PolicyConfig {
        Self::resolve(self.current)
    }

    /// Raise a request to at least the level's floor
    ///
    /// Every requirement is a max of the caller's and the level's, so a
    /// stronger caller requirement always survives. A request for zero hops
    /// or with a floor past [`MAX_HOPS`] is rejected before any raising.
    pub fn validate_request(
        level: SecurityLevel,
        request: ChainRequest,
    ) -> Result<ChainRequest, PolicyError> {
        if request.desired_hops == 0 {
            return Err(PolicyError::NoHops);
        }
        if request.min_hops > MAX_HOPS {
            return Err(PolicyError::HopFloorTooHigh(request.min_hops));
        }

        let policy = Self::resolve(level);
        let mut validated = request;

        validated.min_hops = validated.min_hops.max(policy.min_hops);
        validated.desired_hops = validated.desired_hops.max(validated.min_hops);
        validated.requires_health_gate |= policy.requires_health_gate;
        validated.requires_tor |= policy.requires_tor;
        validated.min_anonymity = validated.min_anonymity.max(policy.min_anonymity);

        validated.desired_hops = validated.desired_hops.min(MAX_HOPS);

        debug!(
            "Validated request for {}: {} hops (min {}), health gate {}, tor {}",
            level,
            validated.desired_hops,
            validated.min_hops,
            validated.requires_health_gate,
            validated.requires_tor
        );

        Ok(validated)
    }
}

impl Default for SecurityPolicyEngine {
    fn default() -> Self {
        Self::new(SecurityLevel::default())
    }
}

/// Policy errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Unknown security level: {0}")]
    UnknownLevel(String),

    #[error("Unknown browser preset: {0}")]
    UnknownPreset(String),

    #[error("A chain needs at least one hop")]
    NoHops,

    #[error("Hop floor {0} exceeds the maximum chain length of 3")]
    HopFloorTooHigh(usize),
}
