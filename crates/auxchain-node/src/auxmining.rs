//! Merged-mining work hand-out.
//!
//! A miner asks for a template (`createauxblock`), mines a parent-chain block
//! whose coinbase commits to the template hash, and returns the resulting
//! envelope (`submitauxblock`). Templates are keyed by their header hash and
//! dropped whenever the tip moves.

use std::collections::{HashMap, VecDeque};

use auxchain_consensus::bits_to_target;
use auxchain_core::{from_hex, Amount, AuxPow, Block, ChainId, Hash32};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::chain_store::{block_hash, ChainStore};
use crate::error::{NodeError, NodeResult};
use crate::mempool::Mempool;
use crate::mining::block_template;

/// Work description handed to a merged miner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxBlockTemplate {
    /// Header hash the parent coinbase must commit to.
    pub hash: Hash32,
    /// Our chain ID.
    pub chain_id: ChainId,
    /// Tip the template builds on.
    pub previous_block_hash: Hash32,
    /// Coinbase value (subsidy plus fees).
    pub coinbase_value: Amount,
    /// Required compact target.
    pub bits: u32,
    /// Height of the template block.
    pub height: u64,
    /// Expanded target, little-endian.
    pub target: [u8; 32],
}

impl AuxBlockTemplate {
    /// JSON form returned over RPC.
    pub fn to_json(&self) -> Value {
        json!({
            "hash": self.hash.to_string(),
            "chainid": self.chain_id.0,
            "previousblockhash": self.previous_block_hash.to_string(),
            "coinbasevalue": self.coinbase_value.koinu(),
            "bits": format!("{:08x}", self.bits),
            "height": self.height,
            "_target": hex::encode(self.target),
        })
    }
}

/// Templates kept per tip; the oldest is dropped beyond this.
pub const MAX_TEMPLATES_PER_TIP: usize = 64;

/// Outstanding merged-mining templates for the current tip.
#[derive(Default)]
pub struct AuxMiner {
    tip: Hash32,
    templates: HashMap<Hash32, Block>,
    by_payout: HashMap<Vec<u8>, Hash32>,
    order: VecDeque<Hash32>,
}

impl AuxMiner {
    /// No outstanding templates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of templates currently handed out.
    pub fn outstanding(&self) -> usize {
        self.templates.len()
    }

    /// Build (or reuse) a template paying `payout_script`.
    ///
    /// Fails before merged mining activates at the next height.
    #[instrument(level = "debug", skip_all)]
    pub fn create_aux_block(
        &mut self,
        chain: &ChainStore,
        mempool: &Mempool,
        payout_script: Vec<u8>,
        now: u64,
    ) -> NodeResult<AuxBlockTemplate> {
        let params = chain.params();
        let height = chain.best_height() + 1;
        if !params.auxpow_allowed(height) {
            return Err(NodeError::NotYetAvailable(
                "getauxblock method is not yet available",
            ));
        }

        let tip = chain.best_hash();
        if tip != self.tip {
            self.templates.clear();
            self.by_payout.clear();
            self.order.clear();
            self.tip = tip;
        }

        let cached = self
            .by_payout
            .get(&payout_script)
            .and_then(|h| self.templates.get(h));
        let block = match cached {
            Some(block) => block.clone(),
            None => {
                let (txs, fees) = mempool.select_for_block();
                let mut block =
                    block_template(chain, tip, payout_script.clone(), txs, fees, now)?;
                block.header.header.set_auxpow_flag(true);
                let hash = block_hash(&block);
                while self.order.len() >= MAX_TEMPLATES_PER_TIP {
                    if let Some(old) = self.order.pop_front() {
                        self.forget(&old);
                    }
                }
                self.templates.insert(hash, block.clone());
                self.by_payout.insert(payout_script, hash);
                self.order.push_back(hash);
                debug!(%hash, height, "New aux block template");
                block
            }
        };

        let header = &block.header.header;
        let target = bits_to_target(header.bits)?;
        let mut target_le = [0u8; 32];
        let bytes = target.to_bytes_le();
        let n = bytes.len().min(32);
        target_le[..n].copy_from_slice(&bytes[..n]);

        let coinbase_value = block
            .txs
            .first()
            .ok_or(NodeError::InvalidBlock("template has no coinbase"))?
            .total_output()?;

        Ok(AuxBlockTemplate {
            hash: block_hash(&block),
            chain_id: params.chain_id,
            previous_block_hash: header.prev,
            coinbase_value,
            bits: header.bits,
            height,
            target: target_le,
        })
    }

    /// Attach a mined envelope to the template `hash` and offer it to the chain.
    ///
    /// `Ok(false)` means the chain rejected the block; unknown hashes and
    /// undecodable envelopes are errors.
    #[instrument(level = "debug", skip(self, chain, auxpow_hex), fields(hash = %hash))]
    pub fn submit_aux_block(
        &mut self,
        chain: &mut ChainStore,
        hash: &Hash32,
        auxpow_hex: &str,
        now: u64,
    ) -> NodeResult<bool> {
        let mut block = self
            .templates
            .get(hash)
            .cloned()
            .ok_or(NodeError::UnknownAuxBlock)?;
        let auxpow: AuxPow = from_hex(auxpow_hex)?;
        block.header.set_auxpow(Some(auxpow));

        match chain.insert_block(block, now) {
            Ok(stored) => {
                info!(hash = %stored, height = chain.best_height(), "Aux block accepted");
                self.forget(hash);
                Ok(true)
            }
            Err(NodeError::Consensus(e)) => {
                debug!(error = %e, "Aux block rejected");
                Ok(false)
            }
            Err(e @ (NodeError::InvalidBlock(_) | NodeError::DuplicateBlock(_))) => {
                debug!(error = %e, "Aux block rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn forget(&mut self, hash: &Hash32) {
        self.templates.remove(hash);
        self.by_payout.retain(|_, h| h != hash);
        self.order.retain(|h| h != hash);
    }
}
