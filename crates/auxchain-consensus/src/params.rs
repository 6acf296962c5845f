// Consensus-critical. Changes require tests.
//! Network parameters and height-gated protocol eras.
//!
//! All values here are compiled-in per network and fixed at startup. They are
//! passed explicitly into every validation call; nothing in this crate reads
//! global state.

use auxchain_core::{Amount, ChainId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which network a parameter set describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Network {
    /// Production network.
    Main,
    /// Public test network.
    Test,
    /// Local regression-test network.
    Regtest,
}

/// Retargeting era.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Era {
    /// Fixed-interval retargeting.
    PreDigishield,
    /// Per-block damped retargeting.
    Digishield,
}

/// Heights at which protocol features switch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActivationHeights {
    /// First height retargeted with Digishield.
    pub digishield_start: u64,
    /// First height at which AuxPoW envelopes are accepted.
    pub auxpow_start: u64,
}

/// `value * num / den`, used for timespan clamp bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ratio {
    /// Numerator.
    pub num: i64,
    /// Denominator.
    pub den: i64,
}

impl Ratio {
    /// Construct a ratio.
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Apply to `value`, truncating toward zero.
    pub fn apply(&self, value: i64) -> i64 {
        value * self.num / self.den
    }
}

/// Lower and upper clamp for the (modulated) actual timespan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClampBounds {
    /// Minimum as a ratio of the target timespan.
    pub min: Ratio,
    /// Maximum as a ratio of the target timespan.
    pub max: Ratio,
}

/// Clamp bounds in force from `from_height` onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClampStep {
    /// First height (of the block being retargeted) using these bounds.
    pub from_height: u64,
    /// Bounds to apply.
    pub bounds: ClampBounds,
}

/// Select the last step whose `from_height <= height`.
pub fn clamp_for(steps: &[ClampStep], height: u64) -> Option<ClampBounds> {
    steps
        .iter()
        .rev()
        .find(|s| s.from_height <= height)
        .map(|s| s.bounds)
}

/// Fixed-interval retarget rules.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LegacyRules {
    /// Seconds the retarget interval is expected to take.
    pub target_timespan: i64,
    /// Seconds between blocks.
    pub target_spacing: i64,
    /// Height-indexed clamp table.
    pub clamps: Vec<ClampStep>,
}

impl LegacyRules {
    /// Blocks per retarget interval.
    pub fn interval(&self) -> u64 {
        (self.target_timespan / self.target_spacing).max(1) as u64
    }
}

/// Per-block damped retarget rules.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DigishieldRules {
    /// Seconds between blocks (also the retarget timespan).
    pub target_spacing: i64,
    /// Divisor applied to the timespan deviation.
    pub damping: i64,
    /// Height-indexed clamp table; earlier entries cover the transition window.
    pub clamps: Vec<ClampStep>,
}

/// Coinbase maturity depth in force from `from_height` onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaturityStep {
    /// First spend height using this depth.
    pub from_height: u64,
    /// Confirmations required before a coinbase output is spendable.
    pub depth: u64,
}

/// Block reward schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RewardRules {
    /// Subsidy of the first halving interval.
    pub initial_subsidy: Amount,
    /// Blocks per halving.
    pub halving_interval: u64,
    /// Number of halvings before the tail subsidy applies.
    pub halvings_before_tail: u64,
    /// Constant subsidy once halvings end.
    pub tail_subsidy: Amount,
    /// Height-indexed maturity table.
    pub maturity: Vec<MaturityStep>,
}

/// Complete, immutable parameter set for one network.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChainParams {
    /// Network this set describes.
    pub network: Network,
    /// Our chain ID, as encoded into header versions.
    pub chain_id: ChainId,
    /// Feature activation heights.
    pub activation: ActivationHeights,
    /// Easiest allowed target, in compact form.
    pub pow_limit_bits: u32,
    /// Legacy era rules.
    pub legacy: LegacyRules,
    /// Digishield era rules.
    pub digishield: DigishieldRules,
    /// Keep the parent's bits forever (regression testing).
    pub no_retargeting: bool,
    /// Reject non-legacy headers carrying a foreign chain ID.
    pub strict_chain_id: bool,
    /// Reject AuxPoW whose parent bits demand less work than ours.
    pub require_parent_work: bool,
    /// Reward schedule.
    pub rewards: RewardRules,
}

impl ChainParams {
    /// Classify a height into its retargeting era.
    pub fn era(&self, height: u64) -> Era {
        if height >= self.activation.digishield_start {
            Era::Digishield
        } else {
            Era::PreDigishield
        }
    }

    /// Whether AuxPoW envelopes are legal at `height`.
    pub fn auxpow_allowed(&self, height: u64) -> bool {
        height >= self.activation.auxpow_start
    }

    /// Parameters for `network`.
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::mainnet(),
            Network::Test => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    /// Production network.
    pub fn mainnet() -> Self {
        Self {
            network: Network::Main,
            chain_id: ChainId(0x62),
            activation: ActivationHeights {
                digishield_start: 145_000,
                auxpow_start: 371_337,
            },
            pow_limit_bits: 0x1e0f_ffff,
            legacy: legacy_rules(),
            digishield: published_digishield(145_000),
            no_retargeting: false,
            strict_chain_id: true,
            require_parent_work: false,
            rewards: RewardRules {
                initial_subsidy: Amount::from_coins(500_000),
                halving_interval: 100_000,
                halvings_before_tail: 6,
                tail_subsidy: Amount::from_coins(10_000),
                maturity: vec![
                    MaturityStep {
                        from_height: 0,
                        depth: 30,
                    },
                    MaturityStep {
                        from_height: 145_000,
                        depth: 240,
                    },
                ],
            },
        }
    }

    /// Public test network.
    pub fn testnet() -> Self {
        Self {
            network: Network::Test,
            activation: ActivationHeights {
                digishield_start: 145_000,
                auxpow_start: 158_100,
            },
            ..Self::mainnet()
        }
    }

    /// Local regression-test network.
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            chain_id: ChainId(0x62),
            activation: ActivationHeights {
                digishield_start: 10,
                auxpow_start: 20,
            },
            pow_limit_bits: 0x207f_ffff,
            legacy: legacy_rules(),
            digishield: standard_digishield(10),
            no_retargeting: true,
            strict_chain_id: true,
            require_parent_work: false,
            rewards: RewardRules {
                initial_subsidy: Amount::from_coins(500_000),
                halving_interval: 150,
                halvings_before_tail: 6,
                tail_subsidy: Amount::from_coins(10_000),
                maturity: vec![MaturityStep {
                    from_height: 0,
                    depth: 60,
                }],
            },
        }
    }
}

/// Four-hour interval at one-minute spacing; the clamp floor widens early on.
fn legacy_rules() -> LegacyRules {
    let bounds = |min_den| ClampBounds {
        min: Ratio::new(1, min_den),
        max: Ratio::new(4, 1),
    };
    LegacyRules {
        target_timespan: 4 * 60 * 60,
        target_spacing: 60,
        clamps: vec![
            ClampStep {
                from_height: 0,
                bounds: bounds(16),
            },
            ClampStep {
                from_height: 5_001,
                bounds: bounds(8),
            },
            ClampStep {
                from_height: 10_001,
                bounds: bounds(4),
            },
        ],
    }
}

/// Damping 1/8, clamp [0.75, 1.5], as deployed on the public networks.
fn published_digishield(start: u64) -> DigishieldRules {
    DigishieldRules {
        target_spacing: 60,
        damping: 8,
        clamps: vec![ClampStep {
            from_height: start,
            bounds: ClampBounds {
                min: Ratio::new(3, 4),
                max: Ratio::new(3, 2),
            },
        }],
    }
}

/// Damping 1/4, clamp [0.75, 1.25] after a short widened window.
fn standard_digishield(start: u64) -> DigishieldRules {
    DigishieldRules {
        target_spacing: 60,
        damping: 4,
        clamps: vec![
            ClampStep {
                from_height: start,
                bounds: ClampBounds {
                    min: Ratio::new(1, 2),
                    max: Ratio::new(2, 1),
                },
            },
            ClampStep {
                from_height: start + 5,
                bounds: ClampBounds {
                    min: Ratio::new(3, 4),
                    max: Ratio::new(5, 4),
                },
            },
        ],
    }
}
