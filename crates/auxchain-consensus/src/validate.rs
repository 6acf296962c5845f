// Consensus-critical. Changes require tests.
//! Header proof-of-work and timestamp validation.
//!
//! [`validate_header_pow`] is the single entry point deciding whether a
//! header's (possibly merge-mined) work satisfies the difficulty our chain
//! requires at its height. It does not touch chain state; ancestors are
//! supplied as a [`HeaderInfo`] window.

use crate::auxpow::check_auxpow;
use crate::difficulty::{check_difficulty_bits, HeaderInfo};
use crate::error::{ConsensusError, ConsensusResult};
use crate::params::ChainParams;
use crate::pow::pow_hash;
use crate::target::{compare_work, meets_target};
use auxchain_core::{block_header_hash, AuxPow, BlockHeader, Hash32};
use core::cmp::Ordering;
use tracing::{debug, instrument, warn};

/// Maximum seconds a timestamp may run ahead of local time.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

/// Number of ancestors in the median-time-past window.
pub const MTP_WINDOW: usize = 11;

/// Validate the proof-of-work of a header at `height`.
///
/// `window` holds ancestor headers oldest first, ending at `height - 1`
/// (see [`crate::difficulty::window_len`]).
///
/// Check order:
/// 1. an envelope below the AuxPoW activation height is rejected outright;
/// 2. `bits` must equal the retarget engine's value;
/// 3. version flag and envelope must agree, chain ID must be ours;
/// 4. the effective hash (parent PoW hash or own hash) must meet `bits`.
#[instrument(level = "debug", skip(params, header, auxpow, window), fields(envelope = auxpow.is_some()))]
pub fn validate_header_pow(
    params: &ChainParams,
    header: &BlockHeader,
    auxpow: Option<&AuxPow>,
    height: u64,
    window: &[HeaderInfo],
) -> ConsensusResult<()> {
    let result = check_header_pow(params, header, auxpow, height, window);
    if let Err(e) = &result {
        if e.is_adversarial() {
            warn!(height, error = %e, "Header rejected");
        } else {
            debug!(height, error = %e, "Header rejected");
        }
    }
    result
}

fn check_header_pow(
    params: &ChainParams,
    header: &BlockHeader,
    auxpow: Option<&AuxPow>,
    height: u64,
    window: &[HeaderInfo],
) -> ConsensusResult<()> {
    if auxpow.is_some() && !params.auxpow_allowed(height) {
        return Err(ConsensusError::AuxPowNotYetAllowed);
    }

    let required = check_difficulty_bits(params, height, window, header.bits)?;

    if header.is_auxpow() != auxpow.is_some() {
        return Err(ConsensusError::AuxPowVersionMismatch);
    }
    if params.strict_chain_id && !header.is_legacy() && header.chain_id() != params.chain_id {
        return Err(ConsensusError::WrongChainId);
    }

    let effective: Hash32 = match auxpow {
        Some(aux) => {
            let hash = check_auxpow(params, aux, &block_header_hash(header), height)?;
            if params.require_parent_work
                && compare_work(aux.parent.bits, required)? == Ordering::Less
            {
                return Err(ConsensusError::InsufficientWork);
            }
            hash
        }
        None => pow_hash(header),
    };

    if !meets_target(&effective, required)? {
        return Err(ConsensusError::InsufficientWork);
    }
    Ok(())
}

/// Validate timestamp rules: strictly above MTP and not too far in the future.
///
/// `median_time_past` is `None` only for genesis. `now` is supplied by the
/// caller so the check stays pure.
pub fn validate_header_time(
    header: &BlockHeader,
    median_time_past: Option<u64>,
    now: u64,
) -> ConsensusResult<()> {
    let time = header.time as u64;
    if header.prev != Hash32::zero() {
        let mtp = median_time_past.ok_or(ConsensusError::InvalidHeader(
            "missing median-time-past for non-genesis",
        ))?;
        if time <= mtp {
            return Err(ConsensusError::TimeTooOld);
        }
    }
    if time > now && !is_timestamp_within_drift(time, now, MAX_FUTURE_DRIFT_SECS) {
        return Err(ConsensusError::TimeTooNew);
    }
    Ok(())
}

/// Check if a candidate timestamp is within an absolute drift window.
pub fn is_timestamp_within_drift(candidate: u64, reference: u64, max_drift_secs: u64) -> bool {
    candidate.abs_diff(reference) <= max_drift_secs
}

/// Compute Median-Time-Past over the last up-to-11 timestamps.
pub fn median_time_past(timestamps: &[u64]) -> Option<u64> {
    if timestamps.is_empty() {
        return None;
    }
    let start = timestamps.len().saturating_sub(MTP_WINDOW);
    let mut buf = timestamps[start..].to_vec();
    buf.sort_unstable();
    Some(buf[buf.len() / 2])
}
