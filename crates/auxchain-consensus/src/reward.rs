// Consensus-critical. Changes require tests.
//! Block subsidy schedule and coinbase maturity.

use crate::error::{ConsensusError, ConsensusResult};
use crate::params::ChainParams;
use auxchain_core::Amount;

/// Subsidy for the block at `height`.
///
/// The initial subsidy halves every `halving_interval` blocks until
/// `halvings_before_tail` intervals have passed; after that the fixed tail
/// subsidy applies forever.
pub fn block_subsidy(params: &ChainParams, height: u64) -> Amount {
    let rules = &params.rewards;
    let epochs = height / rules.halving_interval.max(1);
    if epochs >= rules.halvings_before_tail || epochs >= 63 {
        return rules.tail_subsidy;
    }
    Amount::from_koinu(rules.initial_subsidy.koinu() >> epochs)
}

/// Reject a coinbase paying more than subsidy plus collected fees.
pub fn check_coinbase_value(
    params: &ChainParams,
    height: u64,
    coinbase_value: Amount,
    fees: Amount,
) -> ConsensusResult<()> {
    let allowed = block_subsidy(params, height)
        .checked_add(fees)
        .map_err(|_| ConsensusError::CoinbaseOverpays)?;
    if coinbase_value > allowed {
        return Err(ConsensusError::CoinbaseOverpays);
    }
    Ok(())
}

/// Confirmations needed by a coinbase mined at `coin_height`.
///
/// The depth is fixed by the rules in force when the coin was created.
pub fn coinbase_maturity(params: &ChainParams, coin_height: u64) -> u64 {
    params
        .rewards
        .maturity
        .iter()
        .rev()
        .find(|s| s.from_height <= coin_height)
        .map(|s| s.depth)
        .unwrap_or(0)
}

/// Whether a coinbase mined at `coin_height` is spendable in a block at `spend_height`.
pub fn is_spendable(params: &ChainParams, coin_height: u64, spend_height: u64) -> bool {
    spend_height.saturating_sub(coin_height) >= coinbase_maturity(params, coin_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halvings_then_tail() {
        let p = ChainParams::mainnet();
        assert_eq!(block_subsidy(&p, 0), Amount::from_coins(500_000));
        assert_eq!(block_subsidy(&p, 99_999), Amount::from_coins(500_000));
        assert_eq!(block_subsidy(&p, 100_000), Amount::from_coins(250_000));
        assert_eq!(
            block_subsidy(&p, 500_000),
            Amount::from_koinu(Amount::from_coins(500_000).koinu() >> 5)
        );
        assert_eq!(block_subsidy(&p, 600_000), Amount::from_coins(10_000));
        assert_eq!(block_subsidy(&p, u64::MAX), Amount::from_coins(10_000));
    }

    #[test]
    fn regtest_halves_every_150() {
        let p = ChainParams::regtest();
        assert_eq!(block_subsidy(&p, 149), Amount::from_coins(500_000));
        assert_eq!(block_subsidy(&p, 150), Amount::from_coins(250_000));
    }

    #[test]
    fn coinbase_value_limit() {
        let p = ChainParams::regtest();
        let fees = Amount::from_koinu(1_000);
        let max = Amount::from_koinu(Amount::from_coins(500_000).koinu() + 1_000);
        assert!(check_coinbase_value(&p, 1, max, fees).is_ok());
        assert_eq!(
            check_coinbase_value(&p, 1, Amount::from_koinu(max.koinu() + 1), fees),
            Err(ConsensusError::CoinbaseOverpays)
        );
    }

    #[test]
    fn maturity_table() {
        let p = ChainParams::regtest();
        assert_eq!(coinbase_maturity(&p, 100), 60);
        assert!(!is_spendable(&p, 1, 60));
        assert!(is_spendable(&p, 1, 61));

        let main = ChainParams::mainnet();
        assert_eq!(coinbase_maturity(&main, 144_999), 30);
        assert_eq!(coinbase_maturity(&main, 145_000), 240);

        // A coin mined just before the switch keeps the short depth.
        assert!(is_spendable(&main, 144_990, 145_020));
        assert!(!is_spendable(&main, 144_990, 145_019));
        assert!(!is_spendable(&main, 145_000, 145_030));
        assert!(is_spendable(&main, 145_000, 145_240));
    }
}
