//! Daemon configuration: CLI flags with `ENGAGE_*` environment fallbacks.

use std::time::Duration;

use clap::Parser;
use engage_evm::model::BlockchainNetwork;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid network spec {0:?}, expected NAME,CHAIN_ID,RPC_URL")]
    InvalidNetwork(String),
    #[error("no networks configured; pass --network or set ENGAGE_NETWORKS")]
    NoNetworks,
}

#[derive(Parser, Debug)]
#[command(name = "engage-evmd", about = "EVM engagement connector daemon")]
pub struct Args {
    /// Address the HTTP API binds to.
    #[arg(long, default_value = "0.0.0.0:8098")]
    pub bind: String,

    /// Watched network as NAME,CHAIN_ID,RPC_URL. Repeatable.
    #[arg(long = "network", value_name = "NAME,CHAIN_ID,RPC_URL")]
    pub networks: Vec<String>,

    /// Seconds between transfer scans.
    #[arg(long, default_value_t = 60)]
    pub scan_interval_secs: u64,

    /// Database directory for the sled backend.
    #[arg(long)]
    pub db_path: Option<String>,

    /// Token metadata cache capacity; 0 disables caching.
    #[arg(long, default_value_t = 64)]
    pub token_cache_capacity: usize,

    /// JSON file with watch rules to seed at startup.
    #[arg(long)]
    pub rules_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub networks: Vec<BlockchainNetwork>,
    pub scan_interval: Duration,
    pub db_path: Option<String>,
    pub token_cache_capacity: usize,
    pub rules_file: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let bind = if args.bind == "0.0.0.0:8098" {
            std::env::var("ENGAGE_BIND").unwrap_or(args.bind)
        } else {
            args.bind
        };

        // Flags win; the environment fills in when none were passed
        let mut specs = args.networks;
        if specs.is_empty() {
            if let Ok(raw) = std::env::var("ENGAGE_NETWORKS") {
                specs = raw.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
            }
        }
        let networks = specs.iter().map(|spec| parse_network(spec)).collect::<Result<Vec<_>, _>>()?;
        if networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }

        let db_path = args.db_path.or_else(|| std::env::var("ENGAGE_DB_PATH").ok());
        let rules_file = args.rules_file.or_else(|| std::env::var("ENGAGE_RULES_FILE").ok());

        Ok(Self {
            bind,
            networks,
            scan_interval: Duration::from_secs(args.scan_interval_secs.max(1)),
            db_path,
            token_cache_capacity: args.token_cache_capacity,
            rules_file,
        })
    }
}

fn parse_network(spec: &str) -> Result<BlockchainNetwork, ConfigError> {
    let mut parts = spec.splitn(3, ',').map(str::trim);
    let (Some(name), Some(chain_id), Some(url)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ConfigError::InvalidNetwork(spec.to_string()));
    };
    let network_id = chain_id.parse::<u64>().map_err(|_| ConfigError::InvalidNetwork(spec.to_string()))?;
    if name.is_empty() || url.is_empty() {
        return Err(ConfigError::InvalidNetwork(spec.to_string()));
    }
    Ok(BlockchainNetwork { name: name.to_string(), provider_url: url.to_string(), network_id })
}
