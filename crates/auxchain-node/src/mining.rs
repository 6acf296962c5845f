//! Block assembly: genesis, templates and local nonce grinding.

use auxchain_consensus::{block_subsidy, collect_window, grind_nonce, next_bits, ChainParams};
use auxchain_core::{
    merkle_root, txid, Amount, Block, BlockHeader, Hash32, MergedHeader, OutPoint, Transaction,
    TxIn, TxOut,
};
use tracing::debug;

use crate::chain_store::ChainStore;
use crate::error::{NodeError, NodeResult};

/// Base header version for new blocks (chain ID and AuxPoW flag are added on top).
pub const BLOCK_VERSION: i32 = 4;

/// Genesis timestamp shared by every network.
pub const GENESIS_TIME: u32 = 1_386_325_540;

/// Unspendable genesis payout script.
const GENESIS_PAYOUT: [u8; 1] = [0x6a];

/// Nonces tried per block before giving up.
pub const MAX_GRIND_TRIES: u64 = 1 << 32;

/// Coinbase paying `value` to `payout_script`; the script sig encodes the height.
pub fn coinbase_tx(height: u64, value: Amount, payout_script: Vec<u8>) -> Transaction {
    let mut script_sig = vec![8u8];
    script_sig.extend_from_slice(&height.to_le_bytes());
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value,
            script_pubkey: payout_script,
        }],
        lock_time: 0,
    }
}

/// Build and mine the deterministic genesis block for `params`.
pub fn build_genesis(params: &ChainParams) -> NodeResult<Block> {
    let coinbase = coinbase_tx(0, block_subsidy(params, 0), GENESIS_PAYOUT.to_vec());
    let mut header = BlockHeader {
        version: 1,
        prev: Hash32::zero(),
        merkle_root: merkle_root(&[txid(&coinbase)]),
        time: GENESIS_TIME,
        bits: params.pow_limit_bits,
        nonce: 0,
    };
    if !grind_nonce(&mut header, params.pow_limit_bits, MAX_GRIND_TRIES)? {
        return Err(NodeError::InvalidBlock("no genesis nonce within grind budget"));
    }
    Ok(Block {
        header: MergedHeader::plain(header),
        txs: vec![coinbase],
    })
}

/// Unmined block on top of `prev` carrying `txs`, whose fees total `fees`.
///
/// Bits come from the retarget engine; the timestamp is `now` bumped past
/// the median time of the parent's ancestors.
pub fn block_template(
    chain: &ChainStore,
    prev: Hash32,
    payout_script: Vec<u8>,
    txs: Vec<Transaction>,
    fees: Amount,
    now: u64,
) -> NodeResult<Block> {
    let params = chain.params();
    let parent = chain.entry(&prev).ok_or(NodeError::UnknownParent(prev))?;
    let height = parent.height + 1;

    let window = collect_window(&chain.branch(prev), params, height)?;
    let bits = next_bits(params, height, &window)?;

    let earliest = chain.median_time_past(prev).map_or(0, |mtp| mtp + 1);
    let time = u32::try_from(now.max(earliest))
        .map_err(|_| NodeError::InvalidBlock("timestamp out of range"))?;

    let value = block_subsidy(params, height).checked_add(fees)?;
    let mut all = Vec::with_capacity(txs.len() + 1);
    all.push(coinbase_tx(height, value, payout_script));
    all.extend(txs);
    let txids: Vec<Hash32> = all.iter().map(txid).collect();

    let mut header = BlockHeader {
        version: 0,
        prev,
        merkle_root: merkle_root(&txids),
        time,
        bits,
        nonce: 0,
    };
    header.set_base_version(BLOCK_VERSION, params.chain_id);

    Ok(Block {
        header: MergedHeader::plain(header),
        txs: all,
    })
}

/// Template on `prev` with its own header nonce ground to meet the bits.
pub fn mine_block_on(
    chain: &ChainStore,
    prev: Hash32,
    payout_script: Vec<u8>,
    txs: Vec<Transaction>,
    fees: Amount,
    now: u64,
) -> NodeResult<Block> {
    let mut block = block_template(chain, prev, payout_script, txs, fees, now)?;
    let bits = block.header.header.bits;
    if !grind_nonce(&mut block.header.header, bits, MAX_GRIND_TRIES)? {
        return Err(NodeError::InvalidBlock("no nonce within grind budget"));
    }
    debug!(nonce = block.header.header.nonce, bits, "Nonce found");
    Ok(block)
}

/// Mine and store one standard block on the current tip.
pub fn mine_block(
    chain: &mut ChainStore,
    payout_script: Vec<u8>,
    txs: Vec<Transaction>,
    fees: Amount,
    now: u64,
) -> NodeResult<Hash32> {
    let tip = chain.best_hash();
    let block = mine_block_on(chain, tip, payout_script, txs, fees, now)?;
    chain.insert_block(block, now)
}

/// Current UNIX time (seconds).
pub fn current_time() -> u64 {
    time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}
