//! Unspent output set, rebuilt by replaying the active chain.

use std::collections::{HashMap, HashSet};

use auxchain_consensus::{check_coinbase_value, is_spendable, ChainParams};
use auxchain_core::{txid, Amount, Block, OutPoint, Transaction, TxOut};

use crate::error::{NodeError, NodeResult};

/// An unspent output and where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    /// The output itself.
    pub output: TxOut,
    /// Height of the block that created it.
    pub height: u64,
    /// Whether it was created by a coinbase (subject to maturity).
    pub is_coinbase: bool,
}

/// Outpoint-indexed coins of one chain.
#[derive(Clone, Debug, Default)]
pub struct UtxoSet {
    coins: HashMap<OutPoint, Coin>,
}

impl UtxoSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coin at `out`, if unspent.
    pub fn get(&self, out: &OutPoint) -> Option<&Coin> {
        self.coins.get(out)
    }

    /// Number of unspent outputs.
    pub fn len(&self) -> usize {
        self.coins.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Sum inputs minus outputs for a non-coinbase transaction spending at `height`.
    pub fn tx_fee(
        &self,
        params: &ChainParams,
        tx: &Transaction,
        height: u64,
    ) -> NodeResult<Amount> {
        let mut input_total = Amount::zero();
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if !seen.insert(input.prevout) {
                return Err(NodeError::InvalidBlock("duplicate input"));
            }
            let coin = self
                .coins
                .get(&input.prevout)
                .ok_or(NodeError::InvalidBlock("input missing or already spent"))?;
            if coin.is_coinbase && !is_spendable(params, coin.height, height) {
                return Err(NodeError::InvalidBlock("premature spend of coinbase"));
            }
            input_total = input_total.checked_add(coin.output.value)?;
        }
        let output_total = tx.total_output()?;
        input_total
            .checked_sub(output_total)
            .map_err(|_| NodeError::InvalidBlock("outputs exceed inputs"))
    }

    /// Apply a block at `height`, enforcing input availability, maturity and
    /// the coinbase value limit. Leaves `self` untouched on error.
    pub fn apply_block(&mut self, params: &ChainParams, height: u64, block: &Block) -> NodeResult<Amount> {
        let mut next = self.clone();
        let mut fees = Amount::zero();

        for tx in block.txs.iter().skip(1) {
            fees = fees.checked_add(next.tx_fee(params, tx, height)?)?;
            for input in &tx.inputs {
                next.coins.remove(&input.prevout);
            }
            next.add_outputs(tx, height, false);
        }

        let coinbase = block
            .txs
            .first()
            .ok_or(NodeError::InvalidBlock("block has no coinbase"))?;
        check_coinbase_value(params, height, coinbase.total_output()?, fees)?;
        next.add_outputs(coinbase, height, true);

        *self = next;
        Ok(fees)
    }

    fn add_outputs(&mut self, tx: &Transaction, height: u64, is_coinbase: bool) {
        let id = txid(tx);
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.coins.insert(
                OutPoint {
                    txid: id,
                    vout: vout as u32,
                },
                Coin {
                    output: output.clone(),
                    height,
                    is_coinbase,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::coinbase_tx;
    use auxchain_consensus::ConsensusError;
    use auxchain_core::{BlockHeader, Hash32, MergedHeader, TxIn};

    fn block(txs: Vec<Transaction>) -> Block {
        Block {
            header: MergedHeader::plain(BlockHeader {
                version: 1,
                prev: Hash32::zero(),
                merkle_root: Hash32::zero(),
                time: 0,
                bits: 0x207f_ffff,
                nonce: 0,
            }),
            txs,
        }
    }

    fn spend(prev: &Transaction, value: Amount) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint {
                    txid: txid(prev),
                    vout: 0,
                },
                script_sig: vec![0x00],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn coinbase_matures_then_pays_fee_forward() {
        let params = ChainParams::regtest();
        let mut set = UtxoSet::new();
        let cb = coinbase_tx(1, Amount::from_coins(500_000), vec![0x51]);
        set.apply_block(&params, 1, &block(vec![cb.clone()])).expect("apply");
        assert_eq!(set.len(), 1);

        let tx = spend(&cb, Amount::from_coins(499_990));
        assert!(matches!(
            set.tx_fee(&params, &tx, 60),
            Err(NodeError::InvalidBlock("premature spend of coinbase"))
        ));
        assert_eq!(set.tx_fee(&params, &tx, 61).expect("fee"), Amount::from_coins(10));

        let reward = Amount::from_coins(500_000 + 10);
        let fees = set
            .apply_block(
                &params,
                61,
                &block(vec![coinbase_tx(61, reward, vec![0x52]), tx.clone()]),
            )
            .expect("apply");
        assert_eq!(fees, Amount::from_coins(10));
        assert_eq!(set.len(), 2);
        assert!(set.get(&OutPoint { txid: txid(&cb), vout: 0 }).is_none());
        assert!(!set.get(&OutPoint { txid: txid(&tx), vout: 0 }).expect("new coin").is_coinbase);
    }

    #[test]
    fn failed_block_leaves_set_untouched() {
        let params = ChainParams::regtest();
        let mut set = UtxoSet::new();
        let cb = coinbase_tx(1, Amount::from_coins(500_000), vec![0x51]);
        set.apply_block(&params, 1, &block(vec![cb.clone()])).expect("apply");

        let a = spend(&cb, Amount::from_coins(1));
        let mut b = spend(&cb, Amount::from_coins(2));
        b.lock_time = 1;
        let double = block(vec![coinbase_tx(70, Amount::zero(), vec![0x51]), a, b]);
        assert!(matches!(
            set.apply_block(&params, 70, &double),
            Err(NodeError::InvalidBlock("input missing or already spent"))
        ));

        let greedy = block(vec![coinbase_tx(70, Amount::from_coins(500_001), vec![0x51])]);
        assert!(matches!(
            set.apply_block(&params, 70, &greedy),
            Err(NodeError::Consensus(ConsensusError::CoinbaseOverpays))
        ));
        assert_eq!(set.len(), 1);
        assert!(set.get(&OutPoint { txid: txid(&cb), vout: 0 }).is_some());
    }

    #[test]
    fn repeated_input_counts_once_and_is_rejected() {
        let params = ChainParams::regtest();
        let mut set = UtxoSet::new();
        let cb = coinbase_tx(1, Amount::from_coins(500_000), vec![0x51]);
        set.apply_block(&params, 1, &block(vec![cb.clone()])).expect("apply");

        let mut tx = spend(&cb, Amount::from_coins(999_990));
        tx.inputs.push(tx.inputs[0].clone());
        assert!(matches!(
            set.tx_fee(&params, &tx, 61),
            Err(NodeError::InvalidBlock("duplicate input"))
        ));

        let reward = Amount::from_coins(500_000 + 10);
        let minted = block(vec![coinbase_tx(61, reward, vec![0x52]), tx]);
        assert!(matches!(
            set.apply_block(&params, 61, &minted),
            Err(NodeError::InvalidBlock("duplicate input"))
        ));
        assert_eq!(set.len(), 1);
        assert!(set.get(&OutPoint { txid: txid(&cb), vout: 0 }).is_some());
    }
}
