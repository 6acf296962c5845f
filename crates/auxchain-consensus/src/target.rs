// Consensus-critical. Changes require tests.
//! Difficulty target utilities.
//!
//! `BlockHeader.bits` uses the Bitcoin "compact" encoding of a 256-bit target:
//! `bits = (exponent << 24) | mantissa` where mantissa is 3 bytes.
//!
//! - exponent = (bits >> 24) as u8
//! - mantissa = bits & 0x007fffff (0x00800000 is a sign bit and is rejected)
//!
//! Then: target = mantissa * 2^(8*(exponent-3))
//!
//! Hashes are compared as little-endian 256-bit integers. No floats anywhere.

use core::cmp::Ordering;

use crate::error::ConsensusError;
use auxchain_core::Hash32;
use num_bigint::BigUint;
use num_traits::Zero;

/// Decode compact `bits` to a full target.
///
/// Rejects encodings that are negative, overflow 256 bits, or represent zero.
pub fn bits_to_target(bits: u32) -> Result<BigUint, ConsensusError> {
    let exponent = bits >> 24;
    let word = bits & 0x007f_ffff;

    if word != 0 && (bits & 0x0080_0000) != 0 {
        return Err(ConsensusError::MalformedTarget);
    }

    let overflow = word != 0
        && (exponent > 34 || (word > 0xff && exponent > 33) || (word > 0xffff && exponent > 32));
    if overflow {
        return Err(ConsensusError::MalformedTarget);
    }

    let mant = BigUint::from(word);
    let target = if exponent <= 3 {
        mant >> (8 * (3 - exponent))
    } else {
        mant << (8 * (exponent - 3))
    };

    if target.is_zero() {
        return Err(ConsensusError::MalformedTarget);
    }

    Ok(target)
}

/// Encode a target into compact `bits`.
///
/// Truncates to the 3 most significant bytes, matching what
/// [`bits_to_target`] expands, so engine output round-trips exactly.
pub fn target_to_bits(target: &BigUint) -> Result<u32, ConsensusError> {
    if target.is_zero() {
        return Err(ConsensusError::MalformedTarget);
    }

    let bytes = target.to_bytes_be();
    let mut exponent = bytes.len() as u32;
    if exponent > 32 {
        return Err(ConsensusError::MalformedTarget);
    }

    let mut mantissa: u32 = if exponent <= 3 {
        let mut m = 0u32;
        for b in &bytes {
            m = (m << 8) | *b as u32;
        }
        m << (8 * (3 - exponent))
    } else {
        ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
    };

    // Keep the sign bit clear by moving one byte into the exponent.
    if (mantissa & 0x0080_0000) != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    Ok((exponent << 24) | mantissa)
}

/// Interpret a hash as a little-endian 256-bit integer.
pub fn hash_to_uint(hash: &Hash32) -> BigUint {
    BigUint::from_bytes_le(hash.as_bytes())
}

/// Returns `true` if `hash <= target`.
pub fn hash_meets_target(hash: &Hash32, target: &BigUint) -> bool {
    hash_to_uint(hash) <= *target
}

/// Returns `true` if `hash <= expand(bits)`.
pub fn meets_target(hash: &Hash32, bits: u32) -> Result<bool, ConsensusError> {
    let target = bits_to_target(bits)?;
    Ok(hash_meets_target(hash, &target))
}

/// Compare the work represented by two compact targets.
///
/// A lower target means more work, so `Greater` means `a` demands more work.
pub fn compare_work(a_bits: u32, b_bits: u32) -> Result<Ordering, ConsensusError> {
    let a = bits_to_target(a_bits)?;
    let b = bits_to_target(b_bits)?;
    Ok(b.cmp(&a))
}
