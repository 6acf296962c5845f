#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use auxchain_consensus::ChainParams;
use auxchain_node::config::{resolve_config, Config};
use auxchain_node::mempool::Mempool;
use auxchain_node::mining::build_genesis;
use auxchain_node::rpc::{generate_blocks, serve_rpc, Node};
use auxchain_node::ChainStore;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cfg = resolve_config(Config::parse())?;

    let env_filter =
        EnvFilter::try_new(&cfg.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    for warning in cfg.fee_policy.warnings() {
        warn!("{warning}");
    }

    let params = ChainParams::for_network(cfg.network);
    info!(
        network = ?cfg.network,
        chain_id = %params.chain_id,
        auxpow_start = params.activation.auxpow_start,
        digishield_start = params.activation.digishield_start,
        "Starting auxchain node"
    );

    let genesis = build_genesis(&params).context("building genesis block")?;
    let chain = ChainStore::load_or_init(&cfg.db_path, params, genesis)
        .with_context(|| format!("opening chain database {}", cfg.db_path.display()))?;
    let mempool = Mempool::new(cfg.fee_policy.clone(), cfg.allow_free);
    let node = Arc::new(Node::new(
        chain,
        mempool,
        cfg.payout_script.clone(),
        cfg.rpc_token.clone(),
    ));

    serve_rpc(&cfg.rpc_listen.to_string(), Arc::clone(&node)).context("binding RPC socket")?;

    let Some(interval) = cfg.mine_interval else {
        loop {
            thread::park();
        }
    };

    info!(interval_secs = interval.as_secs(), "Local mining enabled");
    loop {
        thread::sleep(interval);
        match generate_blocks(&node, 1, &cfg.payout_script) {
            Ok(hashes) => {
                for hash in hashes {
                    info!(%hash, "Mined block");
                }
            }
            Err(e) => warn!(error = %e, "Mining failed"),
        }
    }
}
