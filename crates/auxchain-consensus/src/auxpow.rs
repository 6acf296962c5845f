// Consensus-critical. Changes require tests.
//! AuxPoW envelope validation.
//!
//! A merge-mined block is accepted on the strength of a parent-chain header.
//! The envelope proves three things:
//!
//! 1. the parent coinbase is transaction 0 of the parent block;
//! 2. the coinbase's first input script commits to a chain merkle root that
//!    includes our block hash at a slot derived from `(nonce, chain_id)`;
//! 3. the parent header satisfies its own target.
//!
//! Whether the parent's work also meets *our* target is decided by the
//! caller (see [`crate::validate::validate_header_pow`]).

use crate::error::{ConsensusError, ConsensusResult};
use crate::params::ChainParams;
use crate::pow::{grind_nonce, pow_hash};
use crate::target::meets_target;
use auxchain_core::{
    block_header_hash, txid, AuxPow, BlockHash, BlockHeader, ChainId, Hash32, MergedHeader,
    MerkleBranch, OutPoint, Transaction, TxIn, LEGACY_ROOT_MAX_OFFSET,
    MAX_CHAIN_MERKLE_BRANCH, MAX_COINBASE_MERKLE_BRANCH, MERGED_MINING_HEADER,
};
use tracing::debug;

/// Outcome of searching a script for a byte pattern that must appear at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerSearch {
    /// Pattern does not occur.
    NotFound,
    /// Pattern occurs exactly once, at this offset.
    Found(usize),
    /// Pattern occurs more than once.
    Ambiguous,
}

/// Locate `needle` in `haystack`, distinguishing a unique hit from repeats.
pub fn find_unique(haystack: &[u8], needle: &[u8]) -> MarkerSearch {
    if needle.is_empty() || needle.len() > haystack.len() {
        return MarkerSearch::NotFound;
    }
    let mut hits = haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, w)| *w == needle)
        .map(|(i, _)| i);
    match (hits.next(), hits.next()) {
        (None, _) => MarkerSearch::NotFound,
        (Some(i), None) => MarkerSearch::Found(i),
        (Some(_), Some(_)) => MarkerSearch::Ambiguous,
    }
}

/// Slot in a chain merkle tree of height `h` reserved for `chain_id` under `nonce`.
///
/// All arithmetic wraps at 32 bits so every implementation agrees.
pub fn expected_index(nonce: u32, chain_id: ChainId, h: usize) -> u32 {
    let mut r = nonce.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    r = r.wrapping_add(chain_id.0 as u32);
    r = r.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    if h >= 32 {
        r
    } else {
        r % (1u32 << h)
    }
}

/// Validate an AuxPoW envelope for the block hashing to `aux_block_hash` at `height`.
///
/// Returns the effective proof-of-work hash (the parent header's PoW hash).
/// The parent is only checked against its own `bits` here.
pub fn check_auxpow(
    params: &ChainParams,
    auxpow: &AuxPow,
    aux_block_hash: &BlockHash,
    height: u64,
) -> ConsensusResult<Hash32> {
    if !params.auxpow_allowed(height) {
        return Err(ConsensusError::AuxPowNotYetAllowed);
    }
    if auxpow.parent.chain_id() == params.chain_id {
        return Err(ConsensusError::SelfMergeMiningForbidden);
    }

    if auxpow.chain_branch.len() > MAX_CHAIN_MERKLE_BRANCH {
        return Err(ConsensusError::AmbiguousChainCommitment(
            "chain merkle branch too long",
        ));
    }
    if auxpow.coinbase_branch.len() > MAX_COINBASE_MERKLE_BRANCH {
        return Err(ConsensusError::CoinbaseNotInParentBlock(
            "coinbase merkle branch too long",
        ));
    }

    check_coinbase_inclusion(auxpow)?;
    check_chain_commitment(params.chain_id, auxpow, aux_block_hash)?;

    let parent_hash = pow_hash(&auxpow.parent);
    match meets_target(&parent_hash, auxpow.parent.bits) {
        Ok(true) => {}
        Ok(false) | Err(_) => return Err(ConsensusError::ParentPowInvalid),
    }

    debug!(
        height,
        parent_chain_id = auxpow.parent.chain_id().0,
        chain_branch_len = auxpow.chain_branch.len(),
        "AuxPoW envelope accepted"
    );
    Ok(parent_hash)
}

fn check_coinbase_inclusion(auxpow: &AuxPow) -> ConsensusResult<()> {
    if auxpow.coinbase_branch.index != 0 {
        return Err(ConsensusError::CoinbaseNotInParentBlock(
            "coinbase is not the first parent transaction",
        ));
    }
    let root = auxpow.coinbase_branch.fold(&txid(&auxpow.coinbase_tx));
    if root != auxpow.parent.merkle_root {
        return Err(ConsensusError::CoinbaseNotInParentBlock(
            "parent merkle root mismatch",
        ));
    }
    Ok(())
}

fn check_chain_commitment(
    chain_id: ChainId,
    auxpow: &AuxPow,
    aux_block_hash: &BlockHash,
) -> ConsensusResult<()> {
    let script = auxpow
        .coinbase_tx
        .inputs
        .first()
        .map(|i| i.script_sig.as_slice())
        .ok_or(ConsensusError::CoinbaseNotInParentBlock(
            "parent coinbase has no inputs",
        ))?;

    // The root is stored in display (reversed) byte order.
    let root = auxpow.chain_branch.fold(aux_block_hash).to_display_bytes();

    let root_at = match find_unique(script, &root) {
        MarkerSearch::Found(at) => at,
        MarkerSearch::NotFound => {
            return Err(ConsensusError::BlockNotCommittedByParent(
                "chain merkle root missing from parent coinbase",
            ))
        }
        MarkerSearch::Ambiguous => {
            return Err(ConsensusError::AmbiguousChainCommitment(
                "chain merkle root appears more than once",
            ))
        }
    };

    match find_unique(script, &MERGED_MINING_HEADER) {
        MarkerSearch::Found(at) => {
            if at + MERGED_MINING_HEADER.len() != root_at {
                return Err(ConsensusError::BlockNotCommittedByParent(
                    "merged mining header not immediately before root",
                ));
            }
        }
        MarkerSearch::NotFound => {
            if root_at > LEGACY_ROOT_MAX_OFFSET {
                return Err(ConsensusError::BlockNotCommittedByParent(
                    "chain merkle root starts too late in coinbase",
                ));
            }
        }
        MarkerSearch::Ambiguous => {
            return Err(ConsensusError::AmbiguousChainCommitment(
                "multiple merged mining headers in coinbase",
            ))
        }
    }

    let tail = &script[root_at + root.len()..];
    if tail.len() < 8 {
        return Err(ConsensusError::BlockNotCommittedByParent(
            "missing chain merkle tree size and nonce",
        ));
    }
    let size = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let nonce = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]);

    let h = auxpow.chain_branch.len();
    if size != 1u32 << h {
        return Err(ConsensusError::BlockNotCommittedByParent(
            "chain merkle tree size mismatch",
        ));
    }
    if auxpow.chain_branch.index != expected_index(nonce, chain_id, h) {
        return Err(ConsensusError::BlockNotCommittedByParent(
            "wrong index in chain merkle tree",
        ));
    }
    Ok(())
}

/// Coinbase script bytes committing to `chain_root`: marker, reversed root, size, nonce.
pub fn commitment_script(chain_root: &Hash32, tree_size: u32, nonce: u32) -> Vec<u8> {
    let mut script = Vec::with_capacity(4 + 32 + 8);
    script.extend_from_slice(&MERGED_MINING_HEADER);
    script.extend_from_slice(&chain_root.to_display_bytes());
    script.extend_from_slice(&tree_size.to_le_bytes());
    script.extend_from_slice(&nonce.to_le_bytes());
    script
}

/// Attach a minimal single-chain envelope to `merged`.
///
/// The parent block holds only a coinbase committing to this header's hash.
/// The envelope is structurally valid but its parent still has to be mined
/// (see [`mine_auxpow`]).
pub fn init_auxpow(merged: &mut MergedHeader) {
    merged.header.set_auxpow_flag(true);
    let aux_hash = block_header_hash(&merged.header);

    let coinbase_tx = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: commitment_script(&aux_hash, 1, 0),
            sequence: u32::MAX,
        }],
        outputs: Vec::new(),
        lock_time: 0,
    };
    let parent = BlockHeader {
        version: 1,
        prev: Hash32::zero(),
        merkle_root: txid(&coinbase_tx),
        time: merged.header.time,
        bits: merged.header.bits,
        nonce: 0,
    };
    merged.set_auxpow(Some(AuxPow {
        coinbase_tx,
        parent_block_hash: block_header_hash(&parent),
        coinbase_branch: MerkleBranch::default(),
        chain_branch: MerkleBranch::default(),
        parent,
    }));
}

/// Grind the parent nonce until the parent meets `bits`.
///
/// Returns `false` if `merged` has no envelope or no solution was found.
pub fn mine_auxpow(merged: &mut MergedHeader, bits: u32, max_tries: u64) -> ConsensusResult<bool> {
    let Some(auxpow) = merged.auxpow.as_mut() else {
        return Ok(false);
    };
    auxpow.parent.bits = bits;
    let found = grind_nonce(&mut auxpow.parent, bits, max_tries)?;
    auxpow.parent_block_hash = block_header_hash(&auxpow.parent);
    Ok(found)
}
