//! anon-chain: proxy chain builder
//!
//! Loads an engine config and a catalog, probes nodes and prints routing
//! descriptors as JSON on stdout. Logs go to stderr.

use anon_chain::{
    BrowserKind, BrowserPreset, CancelToken, CatalogFile, ChainEngine, ChainPreset, EngineConfig,
    FileSource, LaunchPlan, NodeId, ProxyProtocol, SecurityLevel,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "anon-chain")]
#[command(about = "Build and describe multi-hop proxy chains")]
#[command(version)]
struct Cli {
    /// Engine config file (.toml or .json)
    #[arg(short, long, global = true, env = "ANON_CHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog file (.toml or .json); the built-in catalog when omitted
    #[arg(long, global = true, env = "ANON_CHAIN_CATALOG")]
    catalog: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog nodes
    Nodes,

    /// List Tor exit regions
    Regions,

    /// Probe nodes (all live nodes when no IDs are given)
    Probe {
        /// Node IDs to probe
        ids: Vec<String>,
    },

    /// Build a chain and print its routing descriptor
    Chain {
        /// Number of hops (1-3)
        #[arg(long, default_value = "2")]
        hops: usize,
        /// Security level: low, medium, high, maximum
        #[arg(short, long)]
        level: Option<SecurityLevel>,
        /// Preferred country, most preferred first (repeatable)
        #[arg(long = "country")]
        countries: Vec<String>,
        /// Tor exit region ("auto" or a country code)
        #[arg(long)]
        tor: Option<String>,
        /// Accept a shorter chain instead of failing
        #[arg(long)]
        best_effort: bool,
        /// Probe the catalog before building
        #[arg(long)]
        probe: bool,
        /// Print a launch plan for this browser instead of the bare descriptor
        #[arg(long)]
        browser: Option<BrowserKind>,
        /// Hardening preset layered on the level's flags
        #[arg(long, requires = "browser")]
        preset: Option<BrowserPreset>,
        /// Page to open
        #[arg(long, requires = "browser")]
        url: Option<String>,
    },

    /// List named chain presets and whether each holds up
    Presets,

    /// Describe a named chain preset
    Preset {
        /// Preset ID (e.g. chain4)
        id: String,
        /// Security level: low, medium, high, maximum
        #[arg(short, long)]
        level: Option<SecurityLevel>,
        /// Tor exit region ("auto" or a country code)
        #[arg(long)]
        tor: Option<String>,
        /// Print a launch plan for this browser instead of the bare descriptor
        #[arg(long)]
        browser: Option<BrowserKind>,
        /// Page to open
        #[arg(long, requires = "browser")]
        url: Option<String>,
    },

    /// Pick a random node
    Random {
        /// Only consider this protocol
        #[arg(long)]
        protocol: Option<ProxyProtocol>,
        /// Seed for the pick
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Refresh the catalog from a file and report what changed
    Refresh {
        /// Catalog file to refresh from
        source: PathBuf,
    },

    /// Print the effective engine config as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let catalog = match &cli.catalog {
        Some(path) => CatalogFile::from_file(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => CatalogFile::seed(),
    };

    match cli.command {
        Commands::Nodes => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            print_json(&engine.registry().list_nodes())?;
        }

        Commands::Regions => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            print_json(&engine.registry().list_tor_regions())?;
        }

        Commands::Probe { ids } => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            let cancel = cancel_on_ctrl_c();
            let results = if ids.is_empty() {
                engine.probe_catalog(&cancel).await
            } else {
                let ids: Vec<NodeId> = ids.into_iter().map(NodeId::from).collect();
                engine.request_probe_with(&ids, &cancel).await
            };

            let healthy = results.values().filter(|r| r.success).count();
            info!("{} of {} nodes healthy", healthy, results.len());

            let sorted: BTreeMap<String, _> = results
                .into_iter()
                .map(|(id, result)| (id.to_string(), result))
                .collect();
            print_json(&sorted)?;
        }

        Commands::Chain {
            hops,
            level,
            countries,
            tor,
            best_effort,
            probe,
            browser,
            preset,
            url,
        } => {
            config.chain.best_effort |= best_effort;
            let engine = ChainEngine::from_config(&config, catalog)?;

            if probe {
                let results = engine.probe_catalog(&cancel_on_ctrl_c()).await;
                let healthy = results.values().filter(|r| r.success).count();
                info!("Probed {} nodes, {} healthy", results.len(), healthy);
            }

            let descriptor = engine.request_chain(hops, &countries, level, tor.as_deref())?;
            if descriptor.degraded {
                warn!("Chain is shorter than the security level asks for");
            }

            match browser {
                Some(browser) => {
                    let plan = LaunchPlan::new(url.as_deref(), browser, preset, descriptor)?;
                    print_json(&plan)?;
                }
                None => print_json(&descriptor)?,
            }
        }

        Commands::Presets => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            let snapshot = engine.registry().snapshot();
            let listing: Vec<PresetListing> = engine
                .presets()
                .iter()
                .map(|preset| {
                    let problem = preset.resolve(&snapshot).err().map(|e| e.to_string());
                    PresetListing {
                        preset,
                        valid: problem.is_none(),
                        problem,
                    }
                })
                .collect();
            print_json(&listing)?;
        }

        Commands::Preset {
            id,
            level,
            tor,
            browser,
            url,
        } => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            let descriptor = engine.request_preset(&id, level, tor.as_deref())?;

            match browser {
                Some(browser) => {
                    let plan = LaunchPlan::new(url.as_deref(), browser, None, descriptor)?;
                    print_json(&plan)?;
                }
                None => print_json(&descriptor)?,
            }
        }

        Commands::Random { protocol, seed } => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            let snapshot = engine.registry().snapshot();
            let mut rng = StdRng::seed_from_u64(seed);
            match snapshot.random_node(protocol, &mut rng) {
                Some(node) => print_json(node)?,
                None => anyhow::bail!("no live node matches"),
            }
        }

        Commands::Refresh { source } => {
            let engine = ChainEngine::from_config(&config, catalog)?;
            let result = engine.refresh_catalog(&FileSource::new(source)).await?;
            print_json(&result)?;
        }

        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct PresetListing<'a> {
    #[serde(flatten)]
    preset: &'a ChainPreset,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
}

/// Token that fires on Ctrl-C
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling probes");
            trigger.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
