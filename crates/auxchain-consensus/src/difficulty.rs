// Consensus-critical. Changes require tests.
//! Difficulty retargeting.
//!
//! The required `bits` for a block is a pure function of its height, the
//! network parameters and a window of ancestor headers. Each era has its own
//! strategy; [`next_bits`] picks one from [`ChainParams::era`].
//!
//! - Pre-Digishield: fixed-interval retarget with a height-indexed clamp table.
//! - Digishield: every block, with the timespan deviation damped before
//!   clamping.

use crate::error::{ConsensusError, ConsensusResult};
use crate::params::{clamp_for, ChainParams, ClampBounds, DigishieldRules, Era, LegacyRules};
use crate::target::{bits_to_target, target_to_bits};
use num_bigint::BigUint;
use num_traits::Zero;
use tracing::debug;

/// The fields of an ancestor header the retarget engine reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Height of the header.
    pub height: u64,
    /// Header timestamp.
    pub time: u32,
    /// Header compact target.
    pub bits: u32,
}

/// Read-only access to the headers of the chain a candidate extends.
pub trait HeaderHistory {
    /// Header at `height` on the candidate's chain, if known.
    fn header_info(&self, height: u64) -> Option<HeaderInfo>;
}

/// One era's retarget formula.
pub trait RetargetStrategy {
    /// How many blocks before the parent the window must reach.
    fn lookback(&self, next_height: u64) -> u64;

    /// Bits required for `next_height`; `window` ends at the parent.
    fn next_bits(&self, next_height: u64, window: &[HeaderInfo]) -> ConsensusResult<u32>;
}

/// Fixed-interval retargeting.
pub struct LegacyRetarget<'a> {
    rules: &'a LegacyRules,
    pow_limit_bits: u32,
}

impl<'a> LegacyRetarget<'a> {
    /// Strategy over `rules`, capped at `pow_limit_bits`.
    pub fn new(rules: &'a LegacyRules, pow_limit_bits: u32) -> Self {
        Self {
            rules,
            pow_limit_bits,
        }
    }
}

impl RetargetStrategy for LegacyRetarget<'_> {
    fn lookback(&self, next_height: u64) -> u64 {
        let interval = self.rules.interval();
        if next_height % interval != 0 {
            0
        } else if next_height == interval {
            // First retarget after genesis can only reach back to genesis.
            interval - 1
        } else {
            interval
        }
    }

    fn next_bits(&self, next_height: u64, window: &[HeaderInfo]) -> ConsensusResult<u32> {
        let (first, parent) = span(window, self.lookback(next_height))?;
        if next_height % self.rules.interval() != 0 {
            return Ok(parent.bits);
        }

        let timespan = self.rules.target_timespan;
        let actual = parent.time as i64 - first.time as i64;
        let bounds = bounds_at(&self.rules.clamps, next_height)?;
        let bits = scale(parent.bits, actual, timespan, bounds, self.pow_limit_bits)?;
        debug!(
            next_height,
            actual_timespan = actual,
            old_bits = format_args!("{:#010x}", parent.bits),
            new_bits = format_args!("{bits:#010x}"),
            "Legacy retarget"
        );
        Ok(bits)
    }
}

/// Per-block damped retargeting.
pub struct DigishieldRetarget<'a> {
    rules: &'a DigishieldRules,
    pow_limit_bits: u32,
}

impl<'a> DigishieldRetarget<'a> {
    /// Strategy over `rules`, capped at `pow_limit_bits`.
    pub fn new(rules: &'a DigishieldRules, pow_limit_bits: u32) -> Self {
        Self {
            rules,
            pow_limit_bits,
        }
    }

    /// `spacing + (actual - spacing) / damping`, truncated toward zero.
    pub fn modulated_timespan(&self, actual: i64) -> i64 {
        let spacing = self.rules.target_spacing;
        spacing + (actual - spacing) / self.rules.damping
    }
}

impl RetargetStrategy for DigishieldRetarget<'_> {
    fn lookback(&self, next_height: u64) -> u64 {
        if next_height == 1 {
            0
        } else {
            1
        }
    }

    fn next_bits(&self, next_height: u64, window: &[HeaderInfo]) -> ConsensusResult<u32> {
        let (first, parent) = span(window, self.lookback(next_height))?;
        let actual = parent.time as i64 - first.time as i64;
        let modulated = self.modulated_timespan(actual);
        let bounds = bounds_at(&self.rules.clamps, next_height)?;
        let bits = scale(
            parent.bits,
            modulated,
            self.rules.target_spacing,
            bounds,
            self.pow_limit_bits,
        )?;
        debug!(
            next_height,
            actual_timespan = actual,
            modulated_timespan = modulated,
            new_bits = format_args!("{bits:#010x}"),
            "Digishield retarget"
        );
        Ok(bits)
    }
}

/// Number of trailing headers (ending at the parent) needed for `next_height`.
pub fn window_len(params: &ChainParams, next_height: u64) -> usize {
    if next_height == 0 {
        return 0;
    }
    if params.no_retargeting {
        return 1;
    }
    let lookback = match params.era(next_height) {
        Era::PreDigishield => {
            LegacyRetarget::new(&params.legacy, params.pow_limit_bits).lookback(next_height)
        }
        Era::Digishield => {
            DigishieldRetarget::new(&params.digishield, params.pow_limit_bits)
                .lookback(next_height)
        }
    };
    lookback as usize + 1
}

/// Compute the bits required for the block at `next_height`.
///
/// `window` holds ancestors oldest first and must end at `next_height - 1`.
/// Extra leading entries are ignored.
pub fn next_bits(
    params: &ChainParams,
    next_height: u64,
    window: &[HeaderInfo],
) -> ConsensusResult<u32> {
    if next_height == 0 {
        return Ok(params.pow_limit_bits);
    }
    let parent = window.last().ok_or(ConsensusError::IncompleteHistory)?;
    if parent.height + 1 != next_height {
        return Err(ConsensusError::IncompleteHistory);
    }
    if params.no_retargeting {
        return Ok(parent.bits);
    }
    match params.era(next_height) {
        Era::PreDigishield => {
            LegacyRetarget::new(&params.legacy, params.pow_limit_bits).next_bits(next_height, window)
        }
        Era::Digishield => DigishieldRetarget::new(&params.digishield, params.pow_limit_bits)
            .next_bits(next_height, window),
    }
}

/// Reject a header whose `bits` differ from the engine's value.
pub fn check_difficulty_bits(
    params: &ChainParams,
    next_height: u64,
    window: &[HeaderInfo],
    bits: u32,
) -> ConsensusResult<u32> {
    let expected = next_bits(params, next_height, window)?;
    if bits != expected {
        return Err(ConsensusError::BadDifficultyBits {
            expected,
            got: bits,
        });
    }
    Ok(expected)
}

/// Gather the window for `next_height` from a history provider.
pub fn collect_window<H: HeaderHistory + ?Sized>(
    history: &H,
    params: &ChainParams,
    next_height: u64,
) -> ConsensusResult<Vec<HeaderInfo>> {
    let len = window_len(params, next_height) as u64;
    let start = next_height - len;
    (start..next_height)
        .map(|h| history.header_info(h).ok_or(ConsensusError::IncompleteHistory))
        .collect()
}

/// Split off `(first, parent)` where `first` is `lookback` blocks before the parent.
fn span(window: &[HeaderInfo], lookback: u64) -> ConsensusResult<(HeaderInfo, HeaderInfo)> {
    let needed = lookback as usize + 1;
    if window.len() < needed {
        return Err(ConsensusError::IncompleteHistory);
    }
    let tail = &window[window.len() - needed..];
    if tail.windows(2).any(|w| w[0].height + 1 != w[1].height) {
        return Err(ConsensusError::IncompleteHistory);
    }
    Ok((tail[0], tail[needed - 1]))
}

fn bounds_at(steps: &[crate::params::ClampStep], height: u64) -> ConsensusResult<ClampBounds> {
    clamp_for(steps, height).ok_or(ConsensusError::InvalidHeader(
        "retarget parameters do not cover height",
    ))
}

/// Scale the previous target by `clamp(observed) / timespan`, capped at the limit.
fn scale(
    prev_bits: u32,
    observed: i64,
    timespan: i64,
    bounds: ClampBounds,
    pow_limit_bits: u32,
) -> ConsensusResult<u32> {
    let lo = bounds.min.apply(timespan);
    let hi = bounds.max.apply(timespan);
    let clamped = observed.clamp(lo, hi).max(1);

    let limit = bits_to_target(pow_limit_bits)?;
    let prev = bits_to_target(prev_bits)?;
    let mut next = prev * BigUint::from(clamped as u64) / BigUint::from(timespan.max(1) as u64);
    if next > limit {
        next = limit;
    }
    if next.is_zero() {
        next = BigUint::from(1u32);
    }
    target_to_bits(&next)
}
