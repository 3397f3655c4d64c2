//! Launch Plan
//!
//! Data handed to the external browser-launch collaborator. Nothing here
//! spawns a process or touches system proxy settings.
//!
//! # Browsers
//!
//! | Kind | Proxy list (PAC) | Bundled Tor |
//! |------|------------------|-------------|
//! | builtin | yes | no |
//! | chrome | yes | no |
//! | firefox | yes | no |
//! | edge | yes | no |
//! | brave | yes | no |
//! | tor | no (one upstream proxy) | yes |

use crate::emit::RoutingDescriptor;
use crate::policy::{BrowserPreset, HardeningFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Page opened when the caller gives no URL
pub const DEFAULT_URL: &str = "about:blank";

/// Browser the route is handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    /// The embedded webview
    #[default]
    Builtin,
    Chrome,
    Firefox,
    Edge,
    Brave,
    /// Tor Browser
    Tor,
}

impl BrowserKind {
    pub fn all() -> &'static [BrowserKind] {
        &[
            BrowserKind::Builtin,
            BrowserKind::Chrome,
            BrowserKind::Firefox,
            BrowserKind::Edge,
            BrowserKind::Brave,
            BrowserKind::Tor,
        ]
    }

    /// Lowercase identifier
    pub fn code(&self) -> &'static str {
        match self {
            BrowserKind::Builtin => "builtin",
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Edge => "edge",
            BrowserKind::Brave => "brave",
            BrowserKind::Tor => "tor",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrowserKind::Builtin => "Built-in Browser",
            BrowserKind::Chrome => "Google Chrome",
            BrowserKind::Firefox => "Mozilla Firefox",
            BrowserKind::Edge => "Microsoft Edge",
            BrowserKind::Brave => "Brave Browser",
            BrowserKind::Tor => "Tor Browser",
        }
    }

    /// Can take a multi-hop chain through a PAC script
    pub fn accepts_proxy_list(&self) -> bool {
        !matches!(self, BrowserKind::Tor)
    }

    /// Ships its own Tor client
    pub fn bundles_tor(&self) -> bool {
        matches!(self, BrowserKind::Tor)
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for BrowserKind {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BrowserKind::all()
            .iter()
            .copied()
            .find(|kind| kind.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LaunchError::UnknownBrowser(s.to_string()))
    }
}

/// How the launcher should apply the route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteHandoff {
    /// Point the browser at the descriptor's PAC script
    PacScript,
    /// Configure the browser's bundled Tor, with at most one upstream proxy
    TorBundle,
}

/// Everything the launcher needs to open a routed browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPlan {
    pub url: String,
    pub browser: BrowserKind,
    pub handoff: RouteHandoff,
    /// Descriptor flags combined with the preset's
    pub hardening: HardeningFlags,
    pub descriptor: RoutingDescriptor,
}

impl LaunchPlan {
    /// Plan a launch of `browser` on `url` through `descriptor`
    ///
    /// A preset can only add hardening on top of the descriptor's flags.
    pub fn new(
        url: Option<&str>,
        browser: BrowserKind,
        preset: Option<BrowserPreset>,
        descriptor: RoutingDescriptor,
    ) -> Result<Self, LaunchError> {
        let url = normalize_url(url)?;

        let hops = descriptor.proxy_uris.len();
        if !browser.accepts_proxy_list() && hops > 1 {
            return Err(LaunchError::ChainUnsupported { browser, hops });
        }

        let handoff = if browser.bundles_tor() {
            RouteHandoff::TorBundle
        } else {
            RouteHandoff::PacScript
        };

        let hardening = match preset {
            Some(preset) => descriptor.hardening_flags.union(preset.flags()),
            None => descriptor.hardening_flags,
        };

        debug!("Launch plan: {} -> {} ({} hops)", browser, url, hops);
        Ok(Self {
            url,
            browser,
            handoff,
            hardening,
            descriptor,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn normalize_url(url: Option<&str>) -> Result<String, LaunchError> {
    let url = url.map(str::trim).unwrap_or_default();
    if url.is_empty() {
        return Ok(DEFAULT_URL.to_string());
    }
    if url == DEFAULT_URL {
        return Ok(url.to_string());
    }

    let lower = url.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("http://").or_else(|| lower.strip_prefix("https://")) {
        if rest.is_empty() || rest.starts_with('/') {
            return Err(LaunchError::InvalidUrl(url.to_string()));
        }
        return Ok(url.to_string());
    }
    if lower.contains("://") || url.contains(char::is_whitespace) {
        return Err(LaunchError::InvalidUrl(url.to_string()));
    }

    Ok(format!("https://{}", url))
}

/// Launch planning errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("Unknown browser: {0}")]
    UnknownBrowser(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{browser} takes a single upstream proxy, chain has {hops} hops")]
    ChainUnsupported { browser: BrowserKind, hops: usize },
}
