// Consensus-critical. Changes require tests.
//! Bitcoin-style Merkle trees over 32-byte hashes.
//!
//! Parent hashing is `SHA256d(left || right)`. When a level has an odd number
//! of nodes the last one is paired with itself. The same folding rule is used
//! both for the transaction tree of a block and for the chain merkle tree that
//! a parent coinbase commits to.

use crate::serialization::sha256d;
use crate::types::{Hash32, MerkleBranch};

/// Compute the parent hash for two child nodes.
pub fn parent_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(left.as_bytes());
    bytes[32..].copy_from_slice(right.as_bytes());
    sha256d(&bytes)
}

/// Merkle root of `leaves`; the zero hash for an empty list.
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32::zero();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Build the branch proving inclusion of `leaves[index]`.
///
/// Returns `None` when `index` is out of range.
pub fn merkle_branch(leaves: &[Hash32], index: usize) -> Option<MerkleBranch> {
    if index >= leaves.len() {
        return None;
    }
    let mut hashes = Vec::new();
    let mut level = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        let sibling = idx ^ 1;
        // An odd tail pairs with itself.
        let h = level.get(sibling).copied().unwrap_or(level[idx]);
        hashes.push(h);
        level = next_level(&level);
        idx >>= 1;
    }
    Some(MerkleBranch {
        hashes,
        index: index as u32,
    })
}

impl MerkleBranch {
    /// Recompute the root by folding `leaf` up through the branch.
    pub fn fold(&self, leaf: &Hash32) -> Hash32 {
        let mut acc = *leaf;
        let mut idx = self.index;
        for sibling in &self.hashes {
            acc = if idx & 1 == 1 {
                parent_hash(sibling, &acc)
            } else {
                parent_hash(&acc, sibling)
            };
            idx >>= 1;
        }
        acc
    }
}

fn next_level(level: &[Hash32]) -> Vec<Hash32> {
    level
        .chunks(2)
        .map(|pair| {
            let right = pair.get(1).unwrap_or(&pair[0]);
            parent_hash(&pair[0], right)
        })
        .collect()
}
