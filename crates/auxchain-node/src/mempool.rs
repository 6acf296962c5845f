use std::collections::{HashMap, HashSet};

use auxchain_consensus::{is_spendable, ChainParams};
use auxchain_core::{to_bytes, txid, Amount, OutPoint, Transaction, TxId, MAX_TX_BYTES, MAX_TX_IO};
use thiserror::Error;
use tracing::debug;

use crate::fees::FeePolicy;
use crate::utxo::Coin;

/// Read access to the best chain's unspent outputs.
pub trait ChainView {
    /// Coin at `out` if unspent on the best chain.
    fn lookup_coin(&self, out: &OutPoint) -> Option<Coin>;
    /// Height the next block will have.
    fn next_height(&self) -> u64;
    /// Network parameters.
    fn params(&self) -> &ChainParams;
}

/// Reasons a transaction is refused by the pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Structurally invalid.
    #[error("invalid transaction: {0}")]
    InvalidFormat(&'static str),
    /// Already in the pool.
    #[error("transaction already in mempool")]
    DuplicateTx,
    /// Same outpoint spent twice.
    #[error("duplicate input")]
    DuplicateInput,
    /// Input not found on the best chain.
    #[error("missing inputs")]
    UnknownInput,
    /// Input already spent by another pool transaction.
    #[error("input already spent in mempool")]
    AlreadySpent,
    /// Outputs exceed inputs.
    #[error("insufficient input value")]
    InsufficientInputValue,
    /// Spends a coinbase that has not matured.
    #[error("premature spend of coinbase")]
    ImmatureCoinbase,
    /// Fee below the relay minimum.
    #[error("insufficient fee: required {required}, paid {paid}")]
    FeeTooLow {
        /// Minimum relay fee.
        required: Amount,
        /// Fee actually paid.
        paid: Amount,
    },
    /// Oversized transaction.
    #[error("transaction too large")]
    TooLarge,
}

struct PoolEntry {
    tx: Transaction,
    fee: Amount,
}

/// Pool of transactions waiting for a block.
pub struct Mempool {
    txs: HashMap<TxId, PoolEntry>,
    spent: HashMap<OutPoint, TxId>,
    fee_deltas: HashMap<TxId, i64>,
    policy: FeePolicy,
    allow_free: bool,
}

impl Mempool {
    /// Empty pool enforcing `policy`; `allow_free` lets small transactions skip the relay fee.
    pub fn new(policy: FeePolicy, allow_free: bool) -> Self {
        Self {
            txs: HashMap::new(),
            spent: HashMap::new(),
            fee_deltas: HashMap::new(),
            policy,
            allow_free,
        }
    }

    /// The fee policy in force.
    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Whether `id` is pooled.
    pub fn contains(&self, id: &TxId) -> bool {
        self.txs.contains_key(id)
    }

    /// Validate `tx` against `chain` and the fee policy, then pool it.
    pub fn submit_tx<C: ChainView + ?Sized>(
        &mut self,
        chain: &C,
        tx: Transaction,
    ) -> Result<TxId, SubmitError> {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(SubmitError::InvalidFormat("empty inputs or outputs"));
        }
        if tx.inputs.len() > MAX_TX_IO || tx.outputs.len() > MAX_TX_IO {
            return Err(SubmitError::TooLarge);
        }
        if tx.is_coinbase() {
            return Err(SubmitError::InvalidFormat("coinbase as loose transaction"));
        }
        let mut seen_inputs = HashSet::new();
        for inp in &tx.inputs {
            if !seen_inputs.insert(inp.prevout) {
                return Err(SubmitError::DuplicateInput);
            }
        }

        tx.validate_sanity()
            .map_err(|_| SubmitError::InvalidFormat("failed sanity checks"))?;
        let bytes = to_bytes(&tx).len();
        if bytes > MAX_TX_BYTES {
            return Err(SubmitError::TooLarge);
        }

        let id = txid(&tx);
        if self.txs.contains_key(&id) {
            return Err(SubmitError::DuplicateTx);
        }

        let params = chain.params();
        let height = chain.next_height();
        let mut input_total = Amount::zero();
        for inp in &tx.inputs {
            if self.spent.contains_key(&inp.prevout) {
                return Err(SubmitError::AlreadySpent);
            }
            let coin = chain
                .lookup_coin(&inp.prevout)
                .ok_or(SubmitError::UnknownInput)?;
            if coin.is_coinbase && !is_spendable(params, coin.height, height) {
                return Err(SubmitError::ImmatureCoinbase);
            }
            input_total = input_total
                .checked_add(coin.output.value)
                .map_err(|_| SubmitError::InsufficientInputValue)?;
        }

        let output_total = tx
            .total_output()
            .map_err(|_| SubmitError::InsufficientInputValue)?;
        let fee = input_total
            .checked_sub(output_total)
            .map_err(|_| SubmitError::InsufficientInputValue)?;

        let delta = self.fee_deltas.get(&id).copied().unwrap_or(0);
        let required = self.policy.min_relay_fee(&tx, bytes, self.allow_free, delta);
        if fee < required {
            return Err(SubmitError::FeeTooLow {
                required,
                paid: fee,
            });
        }

        for inp in &tx.inputs {
            self.spent.insert(inp.prevout, id);
        }
        debug!(txid = %id, bytes, fee = %fee, "Transaction accepted to mempool");
        self.txs.insert(id, PoolEntry { tx, fee });
        Ok(id)
    }

    /// Adjust the fee priority of `id`; a positive total waives the relay fee.
    pub fn prioritise(&mut self, id: TxId, delta: i64) {
        let entry = self.fee_deltas.entry(id).or_insert(0);
        *entry = entry.saturating_add(delta);
    }

    /// Pooled transactions for the next block, ordered by txid, with their total fee.
    pub fn select_for_block(&self) -> (Vec<Transaction>, Amount) {
        let mut ids: Vec<&TxId> = self.txs.keys().collect();
        ids.sort();
        let mut fees = Amount::zero();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = self.txs.get(id) else {
                continue;
            };
            let Ok(sum) = fees.checked_add(entry.fee) else {
                break;
            };
            fees = sum;
            out.push(entry.tx.clone());
        }
        (out, fees)
    }

    /// Drop transactions that made it into a block.
    pub fn remove_mined(&mut self, mined: &[TxId]) {
        for id in mined {
            if let Some(entry) = self.txs.remove(id) {
                for inp in entry.tx.inputs {
                    self.spent.remove(&inp.prevout);
                }
            }
            self.fee_deltas.remove(id);
        }
    }

    /// Drop transactions whose inputs are gone or immature after a tip change.
    pub fn purge_conflicts<C: ChainView + ?Sized>(&mut self, chain: &C) {
        let params = chain.params();
        let height = chain.next_height();
        let mut to_drop = Vec::new();
        for (id, entry) in self.txs.iter() {
            let stale = entry
                .tx
                .inputs
                .iter()
                .any(|inp| match chain.lookup_coin(&inp.prevout) {
                    Some(coin) => coin.is_coinbase && !is_spendable(params, coin.height, height),
                    None => true,
                });
            if stale {
                to_drop.push(*id);
            }
        }
        if !to_drop.is_empty() {
            debug!(dropped = to_drop.len(), "Purged conflicting mempool transactions");
        }
        self.remove_mined(&to_drop);
    }
}
