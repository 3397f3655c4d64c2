//! Engine and Catalog Configuration
//!
//! Both files can be written as TOML or JSON; the loader picks the parser
//! from the file extension.
//!
//! ```toml
//! security_level = "high"
//! tor_region = "auto"
//!
//! [probe]
//! concurrency_limit = 8
//! timeout_ms = 3000
//! target_host = "example.com"
//! target_port = 443
//! judge_url = "http://judge.example/azenv.php"
//!
//! [chain]
//! seed = 42
//! best_effort = false
//! ```

use crate::judge::JudgeEndpoint;
use crate::node::{AnonymityLevel, ProxyNode, ProxyProtocol, RelativeSpeed, TorExitRegion};
use crate::policy::SecurityLevel;
use crate::probe::ProbeOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }
}

/// Probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Maximum probes in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,
    /// Per-probe timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Destination a proxy is asked to CONNECT to during a handshake probe
    #[serde(default = "default_target_host")]
    pub target_host: String,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    /// Header-echo endpoint used to judge anonymity and exit country
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_url: Option<String>,
}

fn default_concurrency() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_target_host() -> String {
    "example.com".to_string()
}

fn default_target_port() -> u16 {
    443
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency(),
            timeout_ms: default_timeout_ms(),
            target_host: default_target_host(),
            target_port: default_target_port(),
            judge_url: None,
        }
    }
}

impl ProbeSettings {
    /// Options for a probe batch
    pub fn options(&self) -> ProbeOptions {
        ProbeOptions {
            concurrency_limit: self.concurrency_limit,
            per_probe_timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    /// The configured judge, if any
    pub fn judge(&self) -> Result<Option<JudgeEndpoint>, ConfigError> {
        self.judge_url
            .as_deref()
            .map(|url| JudgeEndpoint::parse(url).map_err(ConfigError::InvalidJudgeUrl))
            .transpose()
    }
}

/// Chain builder settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Seed for tie-breaking between equally ranked candidates
    #[serde(default)]
    pub seed: u64,
    /// Accept a shorter chain tagged as degraded instead of failing
    #[serde(default)]
    pub best_effort: bool,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub chain: ChainSettings,
    /// Security level selected at startup
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Tor exit region ("auto" or a country code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tor_region: Option<String>,
}

impl EngineConfig {
    /// Load from a TOML or JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_str_format(&content, format)
    }

    /// Load from a string in the given format
    pub fn from_str_format(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.concurrency_limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.probe.target_host.trim().is_empty() || self.probe.target_port == 0 {
            return Err(ConfigError::InvalidProbeTarget);
        }
        self.probe.judge()?;
        Ok(())
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Catalog of proxy nodes and Tor exit regions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub nodes: Vec<ProxyNode>,
    #[serde(default)]
    pub tor_regions: Vec<TorExitRegion>,
}

impl CatalogFile {
    /// Load from a TOML or JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_str_format(&content, format)
    }

    /// Load from a string in the given format
    pub fn from_str_format(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Export as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Built-in seed catalog of free public proxies and Tor exit regions
    ///
    /// Public proxies come and go; treat these as untested until probed.
    pub fn seed() -> Self {
        use AnonymityLevel::{Anonymous, Elite};
        use ProxyProtocol::{Http, Https, Socks5};

        let nodes = vec![
            ProxyNode::new("proxy1", "8.210.7.146", 3128, Http, "SG", Elite),
            ProxyNode::new("proxy2", "103.149.162.194", 80, Http, "TH", Anonymous),
            ProxyNode::new("proxy3", "47.88.3.19", 8080, Http, "HK", Elite),
            ProxyNode::new("proxy4", "162.223.94.164", 80, Http, "US", Anonymous),
            ProxyNode::new("proxy5", "185.162.231.106", 80, Http, "NL", Elite),
            ProxyNode::new("proxy6", "45.77.177.11", 3128, Https, "US", Elite),
            ProxyNode::new("proxy7", "103.159.46.2", 3128, Https, "BD", Anonymous),
            ProxyNode::new("proxy8", "72.210.252.134", 46164, Socks5, "US", Elite),
            ProxyNode::new("proxy9", "184.178.172.25", 15291, Socks5, "US", Elite),
            ProxyNode::new("proxy10", "192.111.137.35", 4145, Socks5, "CA", Elite),
        ];

        let tor_regions = vec![
            TorExitRegion::new("us", "USA", 1250, RelativeSpeed::Fast),
            TorExitRegion::new("de", "Germany", 890, RelativeSpeed::Fast),
            TorExitRegion::new("fr", "France", 456, RelativeSpeed::Medium),
            TorExitRegion::new("nl", "Netherlands", 723, RelativeSpeed::Fast),
            TorExitRegion::new("gb", "United Kingdom", 345, RelativeSpeed::Medium),
            TorExitRegion::new("ca", "Canada", 234, RelativeSpeed::Medium),
            TorExitRegion::new("se", "Sweden", 167, RelativeSpeed::Fast),
            TorExitRegion::new("ch", "Switzerland", 198, RelativeSpeed::Fast),
            TorExitRegion::new("no", "Norway", 89, RelativeSpeed::Medium),
            TorExitRegion::new("fi", "Finland", 67, RelativeSpeed::Medium),
        ];

        Self { nodes, tor_regions }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,

    #[error("Probe concurrency limit must be at least 1")]
    ZeroConcurrency,

    #[error("Probe timeout must be non-zero")]
    ZeroTimeout,

    #[error("Invalid probe target")]
    InvalidProbeTarget,

    #[error("Invalid judge URL: {0}")]
    InvalidJudgeUrl(String),
}
