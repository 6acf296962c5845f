//! Command-line options with `AUXCHAIN_*` environment fallbacks.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use auxchain_consensus::Network;
use clap::Parser;

use crate::error::{NodeError, NodeResult};
use crate::fees::FeePolicy;

/// Node configuration from CLI flags; unset flags fall back to the environment.
#[derive(Parser, Debug, Default)]
#[command(name = "auxchain-node", version)]
pub struct Config {
    /// Network: main, test or regtest
    #[arg(long = "network")]
    pub network: Option<String>,
    /// Path to the chain database (sled)
    #[arg(long = "db")]
    pub db: Option<PathBuf>,
    /// Listen address for JSON-line RPC
    #[arg(long = "rpc-listen")]
    pub rpc_listen: Option<String>,
    /// Token every RPC request must carry in `auth`
    #[arg(long = "rpc-token")]
    pub rpc_token: Option<String>,
    /// Minimum wallet fee, coins per kB
    #[arg(long = "mintxfee")]
    pub mintxfee: Option<String>,
    /// Wallet fee to pay, coins per kB
    #[arg(long = "paytxfee")]
    pub paytxfee: Option<String>,
    /// Minimum relay fee, coins per kB
    #[arg(long = "minrelaytxfee")]
    pub minrelaytxfee: Option<String>,
    /// Hex payout script for mined blocks
    #[arg(long = "payout")]
    pub payout: Option<String>,
    /// Relay small transactions without fee
    #[arg(long = "allow-free")]
    pub allow_free: bool,
    /// Seconds between locally mined blocks (0 disables)
    #[arg(long = "mine-interval")]
    pub mine_interval: Option<u64>,
    /// Log filter directive (e.g. `info,auxchain_consensus=debug`)
    #[arg(long = "log")]
    pub log: Option<String>,
}

/// Fully resolved node settings.
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Selected network.
    pub network: Network,
    /// Chain database directory.
    pub db_path: PathBuf,
    /// RPC listen address.
    pub rpc_listen: SocketAddr,
    /// Optional RPC token.
    pub rpc_token: Option<String>,
    /// Fee settings.
    pub fee_policy: FeePolicy,
    /// Relay small transactions for free.
    pub allow_free: bool,
    /// Payout script for locally built blocks.
    pub payout_script: Vec<u8>,
    /// Local mining cadence, if enabled.
    pub mine_interval: Option<Duration>,
    /// tracing filter directive.
    pub log_filter: String,
}

/// Resolve `cli` against the process environment.
pub fn resolve_config(cli: Config) -> NodeResult<ResolvedConfig> {
    resolve_config_with(cli, |key| env::var(key).ok())
}

/// Resolve `cli`, looking up missing values through `lookup`.
pub fn resolve_config_with<F>(cli: Config, lookup: F) -> NodeResult<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let network_raw = cli
        .network
        .or_else(|| lookup("AUXCHAIN_NETWORK"))
        .unwrap_or_else(|| "regtest".to_string());
    let network = parse_network(&network_raw)?;

    let db_path = cli
        .db
        .or_else(|| lookup("AUXCHAIN_DB").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(format!("auxchain.{network_raw}.db")));

    let rpc_listen_raw = cli
        .rpc_listen
        .or_else(|| lookup("AUXCHAIN_RPC_LISTEN"))
        .unwrap_or_else(|| "127.0.0.1:22555".to_string());
    let rpc_listen = rpc_listen_raw.parse().map_err(|_| {
        NodeError::InvalidParameter(format!("invalid rpc listen address '{rpc_listen_raw}'"))
    })?;

    let rpc_token = cli.rpc_token.or_else(|| lookup("AUXCHAIN_RPC_TOKEN"));

    let mintxfee = cli.mintxfee.or_else(|| lookup("AUXCHAIN_MINTXFEE"));
    let paytxfee = cli.paytxfee.or_else(|| lookup("AUXCHAIN_PAYTXFEE"));
    let minrelaytxfee = cli.minrelaytxfee.or_else(|| lookup("AUXCHAIN_MINRELAYTXFEE"));
    let fee_policy = FeePolicy::from_args(
        mintxfee.as_deref(),
        paytxfee.as_deref(),
        minrelaytxfee.as_deref(),
    )?;

    let allow_free = cli.allow_free
        || lookup("AUXCHAIN_ALLOW_FREE")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let payout_hex = cli
        .payout
        .or_else(|| lookup("AUXCHAIN_PAYOUT"))
        .unwrap_or_else(|| "51".to_string());
    let payout_script = hex::decode(&payout_hex).map_err(|_| {
        NodeError::InvalidParameter(format!("payout script is not hex: '{payout_hex}'"))
    })?;

    let mine_secs = cli
        .mine_interval
        .or_else(|| lookup("AUXCHAIN_MINE_INTERVAL").and_then(|v| v.parse().ok()))
        .unwrap_or(0);
    let mine_interval = (mine_secs > 0).then(|| Duration::from_secs(mine_secs));

    let log_filter = cli
        .log
        .or_else(|| lookup("AUXCHAIN_LOG"))
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| "info".to_string());

    Ok(ResolvedConfig {
        network,
        db_path,
        rpc_listen,
        rpc_token,
        fee_policy,
        allow_free,
        payout_script,
        mine_interval,
        log_filter,
    })
}

fn parse_network(raw: &str) -> NodeResult<Network> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "main" | "mainnet" => Ok(Network::Main),
        "test" | "testnet" => Ok(Network::Test),
        "regtest" => Ok(Network::Regtest),
        other => Err(NodeError::InvalidParameter(format!("unknown network '{other}'"))),
    }
}
