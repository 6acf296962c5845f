// Consensus-critical. Changes require tests.
//! Proof-of-work hashing.
//!
//! PoW is the SHA256d of the 80-byte wire header, the same function a
//! SHA256d parent chain uses, so one hash serves both standalone blocks and
//! AuxPoW parents.
//!
//! The PoW condition is:
//!     pow_hash_as_le_u256 <= target(bits)

use crate::error::{ConsensusError, ConsensusResult};
use crate::target::meets_target;
use auxchain_core::{block_header_hash, BlockHeader, Hash32};

/// Compute the PoW hash for a header.
pub fn pow_hash(header: &BlockHeader) -> Hash32 {
    block_header_hash(header)
}

/// Validate a header's own proof-of-work against its own `bits`.
pub fn validate_pow(header: &BlockHeader) -> ConsensusResult<()> {
    if !meets_target(&pow_hash(header), header.bits)? {
        return Err(ConsensusError::InsufficientWork);
    }
    Ok(())
}

/// Increment `nonce` until the header meets `bits`, giving up after `max_tries`.
///
/// Returns `true` if a solution was found. Only practical at easy targets.
pub fn grind_nonce(header: &mut BlockHeader, bits: u32, max_tries: u64) -> ConsensusResult<bool> {
    for _ in 0..max_tries {
        if meets_target(&pow_hash(header), bits)? {
            return Ok(true);
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
    Ok(false)
}
