//! Tor Exit Selection
//!
//! Resolves a requested exit region to a [`TorDirective`].
//!
//! The directive is the outermost layer of a route: traffic goes
//! `device -> proxy chain -> Tor exit -> target`. Tor regions and proxy
//! hops are kept as separate layers; a country can be both a preferred
//! proxy country and the Tor exit without the two interacting.

use crate::registry::CatalogSnapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Region request meaning "let Tor pick the exit"
pub const AUTO_REGION: &str = "auto";

/// Tor routing directive handed to the launch collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorDirective {
    /// Lowercase country code, or `"auto"` for an unconstrained exit
    pub exit_region: String,
    /// Never fall back to an exit outside `exit_region`
    #[serde(default)]
    pub strict_nodes: bool,
}

impl TorDirective {
    /// Directive with no exit constraint
    pub fn auto() -> Self {
        Self {
            exit_region: AUTO_REGION.to_string(),
            strict_nodes: false,
        }
    }

    pub fn is_auto(&self) -> bool {
        self.exit_region == AUTO_REGION
    }

    /// Require the exit to stay inside the region
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_nodes = strict && !self.is_auto();
        self
    }

    /// torrc lines expressing this directive
    pub fn torrc_lines(&self) -> Vec<String> {
        if self.is_auto() {
            return Vec::new();
        }

        let mut lines = vec![format!("ExitNodes {{{}}}", self.exit_region)];
        if self.strict_nodes {
            lines.push("StrictNodes 1".to_string());
        }
        lines
    }
}

/// Resolves region requests against the catalog's Tor regions
pub struct TorExitSelector<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> TorExitSelector<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    /// Resolve `"auto"` or a country code
    pub fn resolve(&self, request: &str) -> Result<TorDirective, TorError> {
        let request = request.trim();
        if request.eq_ignore_ascii_case(AUTO_REGION) {
            debug!("Tor exit: automatic");
            return Ok(TorDirective::auto());
        }

        let region = self
            .snapshot
            .tor_region(request)
            .ok_or_else(|| TorError::UnknownRegion(request.to_string()))?;

        debug!("Tor exit: {} ({})", region.display_name, region.country_code);
        Ok(TorDirective {
            exit_region: region.country_code.clone(),
            strict_nodes: false,
        })
    }
}

/// Tor selection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TorError {
    #[error("Unknown Tor exit region: {0}")]
    UnknownRegion(String),
}
