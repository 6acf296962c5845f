//! Fee policy: wallet fee presets and the relay fee floor.
//!
//! Rates are expressed in koinu per 1000 bytes. None of this is consensus.

use auxchain_core::{Amount, Transaction, TxOut, COIN, MAX_MONEY};
use tracing::warn;

use crate::error::{NodeError, NodeResult};

/// Default `-mintxfee`: 0.01 coin/kB.
pub const DEFAULT_TRANSACTION_MINFEE: Amount = Amount::from_koinu(COIN / 100);
/// `-mintxfee` above this draws a warning.
pub const HIGH_TX_FEE_PER_KB: Amount = Amount::from_koinu(COIN / 10);
/// Default `-minrelaytxfee`: 0.001 coin/kB.
pub const DEFAULT_MIN_RELAY_TX_FEE: Amount = Amount::from_koinu(COIN / 1000);
/// Outputs below this value each add the limit to the relay fee.
pub const DEFAULT_DUST_LIMIT: Amount = Amount::from_koinu(COIN / 100);
/// Size of the free-transaction area miners reserve in a block.
pub const DEFAULT_BLOCK_PRIORITY_SIZE: usize = 27_000;

/// A fee rate in koinu per 1000 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FeeRate(Amount);

impl FeeRate {
    /// Rate of `per_kb` koinu per 1000 bytes.
    pub const fn per_kb(per_kb: Amount) -> Self {
        Self(per_kb)
    }

    /// Rate per 1000 bytes.
    pub fn fee_per_kb(self) -> Amount {
        self.0
    }

    /// Fee for a transaction of `bytes`.
    ///
    /// Never rounds a non-zero rate on a non-empty transaction down to zero.
    pub fn fee(self, bytes: usize) -> Amount {
        let per_kb = self.0.koinu() as u128;
        let fee = per_kb * bytes as u128 / 1000;
        let fee = if fee == 0 && bytes != 0 && per_kb > 0 {
            1
        } else {
            fee
        };
        Amount::from_koinu(fee.min(u64::MAX as u128) as u64)
    }

    fn times(self, factor: u64) -> Self {
        Self(Amount::from_koinu(self.0.koinu().saturating_mul(factor)))
    }
}

/// Wallet fee presets, cheapest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeePriority {
    /// The minimum fee.
    Minimum,
    /// Twice the minimum.
    More,
    /// Five times the minimum.
    Wow,
    /// Ten times the minimum.
    Amaze,
    /// A hundred times the minimum.
    ManyGenerous,
    /// A fixed 5.21 coins per kB.
    SuchExpensive,
}

impl FeePriority {
    /// Every preset in ascending order.
    pub const ALL: [FeePriority; 6] = [
        FeePriority::Minimum,
        FeePriority::More,
        FeePriority::Wow,
        FeePriority::Amaze,
        FeePriority::ManyGenerous,
        FeePriority::SuchExpensive,
    ];

    /// Human label.
    pub fn label(self) -> &'static str {
        match self {
            FeePriority::Minimum => "Minimum",
            FeePriority::More => "More",
            FeePriority::Wow => "Wow",
            FeePriority::Amaze => "Amaze",
            FeePriority::ManyGenerous => "Many generous",
            FeePriority::SuchExpensive => "Such expensive",
        }
    }

    /// Parse a preset name as used on the RPC surface (`"wow"`, `"many_generous"`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == ' ' || c == '-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.label().to_ascii_lowercase().replace(' ', "_") == normalized)
    }
}

/// Fee settings resolved from node options.
#[derive(Clone, Debug)]
pub struct FeePolicy {
    min_tx_fee: FeeRate,
    pay_tx_fee: FeeRate,
    min_relay_fee: FeeRate,
    dust_limit: Amount,
    warnings: Vec<String>,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            min_tx_fee: FeeRate::per_kb(DEFAULT_TRANSACTION_MINFEE),
            pay_tx_fee: FeeRate::default(),
            min_relay_fee: FeeRate::per_kb(DEFAULT_MIN_RELAY_TX_FEE),
            dust_limit: DEFAULT_DUST_LIMIT,
            warnings: Vec::new(),
        }
    }
}

impl FeePolicy {
    /// Resolve `-mintxfee`, `-paytxfee` and `-minrelaytxfee` (coin amounts per kB).
    ///
    /// A zero or unparsable `-mintxfee` is an error; a very high one only warns.
    pub fn from_args(
        mintxfee: Option<&str>,
        paytxfee: Option<&str>,
        minrelaytxfee: Option<&str>,
    ) -> NodeResult<Self> {
        let mut policy = Self::default();

        if let Some(raw) = mintxfee {
            let fee = parse_money(raw)
                .filter(|a| a.koinu() != 0)
                .ok_or_else(|| invalid("mintxfee", raw))?;
            if fee > HIGH_TX_FEE_PER_KB {
                let msg = "-mintxfee is set very high! This is the minimum transaction fee you pay on every transaction.";
                warn!("{msg}");
                policy.warnings.push(msg.to_string());
            }
            policy.min_tx_fee = FeeRate::per_kb(fee);
        }
        if let Some(raw) = paytxfee {
            let fee = parse_money(raw).ok_or_else(|| invalid("paytxfee", raw))?;
            policy.pay_tx_fee = FeeRate::per_kb(fee);
        }
        if let Some(raw) = minrelaytxfee {
            let fee = parse_money(raw).ok_or_else(|| invalid("minrelaytxfee", raw))?;
            policy.min_relay_fee = FeeRate::per_kb(fee);
        }
        Ok(policy)
    }

    /// Warnings raised while resolving options.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The configured minimum wallet fee rate.
    pub fn min_tx_fee(&self) -> FeeRate {
        self.min_tx_fee
    }

    /// The rate the wallet actually pays: the larger of `-paytxfee` and `-mintxfee`.
    pub fn effective_fee_rate(&self) -> FeeRate {
        self.pay_tx_fee.max(self.min_tx_fee)
    }

    /// Rate for a wallet preset.
    pub fn fee_rate_for(&self, priority: FeePriority) -> FeeRate {
        match priority {
            FeePriority::SuchExpensive => FeeRate::per_kb(Amount::from_koinu(COIN / 100 * 521)),
            FeePriority::ManyGenerous => self.min_tx_fee.times(100),
            FeePriority::Amaze => self.min_tx_fee.times(10),
            FeePriority::Wow => self.min_tx_fee.times(5),
            FeePriority::More => self.min_tx_fee.times(2),
            FeePriority::Minimum => self.min_tx_fee,
        }
    }

    /// One dust limit per output below the dust limit.
    pub fn dust_fee(&self, outputs: &[TxOut]) -> Amount {
        let dusty = outputs.iter().filter(|o| o.value < self.dust_limit).count() as u64;
        Amount::from_koinu(self.dust_limit.koinu().saturating_mul(dusty))
    }

    /// Minimum fee a transaction of `bytes` must pay to be relayed.
    ///
    /// A positive `fee_delta` (set by prioritisation) waives the fee entirely.
    pub fn min_relay_fee(
        &self,
        tx: &Transaction,
        bytes: usize,
        allow_free: bool,
        fee_delta: i64,
    ) -> Amount {
        if fee_delta > 0 {
            return Amount::zero();
        }

        let mut fee = self
            .min_relay_fee
            .fee(bytes)
            .koinu()
            .saturating_add(self.dust_fee(&tx.outputs).koinu());

        if allow_free && bytes < DEFAULT_BLOCK_PRIORITY_SIZE - 1000 {
            fee = 0;
        }

        Amount::from_koinu(fee.min(MAX_MONEY))
    }
}

fn invalid(name: &'static str, value: &str) -> NodeError {
    NodeError::InvalidAmount {
        name,
        value: value.to_string(),
    }
}

/// Parse a decimal coin amount (`"1"`, `"0.01"`, up to 8 decimals) into koinu.
pub fn parse_money(s: &str) -> Option<Amount> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > 8 || (whole.is_empty() && frac.is_empty()) {
        return None;
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_koinu: u64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<8}").parse().ok()?
    };
    let koinu = whole.checked_mul(COIN)?.checked_add(frac_koinu)?;
    let amount = Amount::from_koinu(koinu);
    amount.in_money_range().then_some(amount)
}
