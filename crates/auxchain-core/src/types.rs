// Consensus-critical. Changes require tests.
//! Canonical protocol types.
//!
//! This module defines the consensus-visible data structures: hashes, amounts,
//! Bitcoin-style transactions, the 80-byte block header, and the AuxPoW
//! envelope that lets a header borrow proof-of-work from a parent chain.

use crate::constants::*;
use borsh::{BorshDeserialize, BorshSerialize};
use core::fmt;
use core::str::FromStr;
use std::collections::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors related to parsing, decoding, or construction of core protocol types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex string had an unexpected byte length.
    #[error("invalid hex length: expected {expected} bytes, got {got} bytes")]
    InvalidHexLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Arithmetic overflow or underflow occurred.
    #[error("amount overflow or underflow")]
    AmountOverflow,

    /// Wire decoding failed.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// A value violated protocol constraints.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// Fixed-size 32-byte hash, stored in internal (digest) byte order.
///
/// `Display`/`FromStr` use the conventional reversed hex form.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hash32(pub [u8; HASH32_LEN]);

impl Hash32 {
    /// Returns an all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; HASH32_LEN])
    }

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; HASH32_LEN] {
        &self.0
    }

    /// Whether every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Bytes in display (big-endian) order.
    pub fn to_display_bytes(&self) -> [u8; HASH32_LEN] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.to_display_bytes()))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_display_bytes()))
    }
}

impl From<[u8; HASH32_LEN]> for Hash32 {
    fn from(value: [u8; HASH32_LEN]) -> Self {
        Self(value)
    }
}

impl From<Hash32> for [u8; HASH32_LEN] {
    fn from(value: Hash32) -> Self {
        value.0
    }
}

impl FromStr for Hash32 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH32_LEN {
            return Err(CoreError::InvalidHexLength {
                expected: HASH32_LEN,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH32_LEN];
        arr.copy_from_slice(&bytes);
        arr.reverse();
        Ok(Self(arr))
    }
}

/// Block hash type.
pub type BlockHash = Hash32;

/// Transaction identifier type.
pub type TxId = Hash32;

/// Amount expressed in the smallest unit ("koinu").
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Amount(pub u64);

impl Amount {
    /// Returns a zero amount.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Constructs an amount from koinu.
    pub const fn from_koinu(koinu: u64) -> Self {
        Self(koinu)
    }

    /// Constructs an amount from whole coins.
    pub const fn from_coins(coins: u64) -> Self {
        Self(coins * COIN)
    }

    /// Returns the underlying koinu value.
    pub const fn koinu(self) -> u64 {
        self.0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Whether the amount lies within `[0, MAX_MONEY]`.
    pub fn in_money_range(self) -> bool {
        self.0 <= MAX_MONEY
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({} koinu)", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, self.0 % COIN)
    }
}

/// Identifies which chain a header's work is meant for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChainId(pub i32);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reference to a transaction output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutPoint {
    /// Transaction holding the output.
    pub txid: TxId,
    /// Output index.
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint used by coinbase inputs.
    pub const fn null() -> Self {
        Self {
            txid: Hash32::zero(),
            vout: u32::MAX,
        }
    }

    /// Whether this is the coinbase null outpoint.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// Transaction input.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxIn {
    /// Output being spent.
    pub prevout: OutPoint,
    /// Unlocking script (arbitrary data for coinbase).
    pub script_sig: Vec<u8>,
    /// Sequence number.
    pub sequence: u32,
}

/// Transaction output.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxOut {
    /// Output value.
    pub value: Amount,
    /// Locking script.
    pub script_pubkey: Vec<u8>,
}

/// Bitcoin-style transaction.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transaction {
    /// Transaction format version.
    pub version: i32,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Lock time.
    pub lock_time: u32,
}

impl Transaction {
    /// A coinbase has exactly one input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of all output values.
    pub fn total_output(&self) -> Result<Amount, CoreError> {
        self.outputs
            .iter()
            .try_fold(Amount::zero(), |acc, o| acc.checked_add(o.value))
    }

    /// Performs basic structural validation.
    pub fn validate_sanity(&self) -> Result<(), CoreError> {
        if self.inputs.is_empty() {
            return Err(CoreError::InvalidValue("transaction has no inputs"));
        }
        if self.outputs.is_empty() {
            return Err(CoreError::InvalidValue("transaction has no outputs"));
        }
        if self.inputs.len() > MAX_TX_IO || self.outputs.len() > MAX_TX_IO {
            return Err(CoreError::InvalidValue("too many inputs or outputs"));
        }
        let total = self.total_output()?;
        if !total.in_money_range() {
            return Err(CoreError::InvalidValue("output total out of range"));
        }
        if self.is_coinbase() {
            let len = self.inputs[0].script_sig.len();
            if !(2..=100).contains(&len) {
                return Err(CoreError::InvalidValue("coinbase script size"));
            }
        } else if self.inputs.iter().any(|i| i.prevout.is_null()) {
            return Err(CoreError::InvalidValue("null prevout in non-coinbase"));
        }
        let mut seen = HashSet::with_capacity(self.inputs.len());
        if !self.inputs.iter().all(|i| seen.insert(i.prevout)) {
            return Err(CoreError::InvalidValue("duplicate input"));
        }
        Ok(())
    }
}

/// The 80-byte block header on which proof-of-work is computed.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockHeader {
    /// Version; high bits carry the chain ID, bit 8 the AuxPoW flag.
    pub version: i32,
    /// Hash of the previous block.
    pub prev: BlockHash,
    /// Merkle root of transaction identifiers.
    pub merkle_root: Hash32,
    /// Block timestamp (Unix seconds).
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Chain ID encoded in the version field.
    pub fn chain_id(&self) -> ChainId {
        ChainId(self.version / VERSION_CHAIN_START)
    }

    /// Version with chain ID and AuxPoW flag stripped.
    pub fn base_version(&self) -> i32 {
        self.version % VERSION_AUXPOW
    }

    /// Whether the AuxPoW flag is set.
    pub fn is_auxpow(&self) -> bool {
        self.version & VERSION_AUXPOW != 0
    }

    /// Headers predating chain-ID tagging.
    pub fn is_legacy(&self) -> bool {
        self.version == 1 || (self.version == 2 && self.chain_id().0 == 0)
    }

    /// Set base version and chain ID, clearing the AuxPoW flag.
    pub fn set_base_version(&mut self, base: i32, chain_id: ChainId) {
        self.version = base % VERSION_AUXPOW + chain_id.0 * VERSION_CHAIN_START;
    }

    /// Set or clear the AuxPoW flag.
    pub fn set_auxpow_flag(&mut self, on: bool) {
        if on {
            self.version |= VERSION_AUXPOW;
        } else {
            self.version &= !VERSION_AUXPOW;
        }
    }
}

/// Ordered sibling hashes plus the leaf position, proving Merkle inclusion.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MerkleBranch {
    /// Sibling hashes from the leaf level upward.
    pub hashes: Vec<Hash32>,
    /// Leaf index; bit `i` selects the side at level `i`.
    pub index: u32,
}

impl MerkleBranch {
    /// Number of levels in the branch.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the branch is empty (single-leaf tree).
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Proof that a parent-chain block committed to one of our block hashes.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AuxPow {
    /// The parent block's coinbase transaction.
    pub coinbase_tx: Transaction,
    /// Parent block hash as carried on the wire; not consulted by validation.
    pub parent_block_hash: BlockHash,
    /// Branch linking the coinbase to the parent block's merkle root.
    pub coinbase_branch: MerkleBranch,
    /// Branch linking our block hash to the chain merkle root in the coinbase.
    pub chain_branch: MerkleBranch,
    /// Parent block header (on which the real work is done).
    pub parent: BlockHeader,
}

/// Block header together with its optional AuxPoW envelope.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MergedHeader {
    /// The pure header.
    pub header: BlockHeader,
    /// AuxPoW envelope, present iff the header's AuxPoW flag is set.
    pub auxpow: Option<AuxPow>,
}

impl MergedHeader {
    /// A header without an AuxPoW envelope.
    pub fn plain(header: BlockHeader) -> Self {
        Self {
            header,
            auxpow: None,
        }
    }

    /// Attach or remove an envelope, keeping the version flag in sync.
    pub fn set_auxpow(&mut self, auxpow: Option<AuxPow>) {
        self.header.set_auxpow_flag(auxpow.is_some());
        self.auxpow = auxpow;
    }
}

/// Full block (header + transactions).
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    /// Block header and optional envelope.
    pub header: MergedHeader,
    /// Transactions included in this block; `txs[0]` is the coinbase.
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Performs basic structural validation.
    pub fn validate_sanity(&self) -> Result<(), CoreError> {
        let coinbase = self
            .txs
            .first()
            .ok_or(CoreError::InvalidValue("block has no transactions"))?;
        if !coinbase.is_coinbase() {
            return Err(CoreError::InvalidValue("first transaction must be coinbase"));
        }
        if self.txs.iter().skip(1).any(Transaction::is_coinbase) {
            return Err(CoreError::InvalidValue("more than one coinbase"));
        }
        if self.header.header.is_auxpow() != self.header.auxpow.is_some() {
            return Err(CoreError::InvalidValue("auxpow flag does not match envelope"));
        }
        for tx in &self.txs {
            tx.validate_sanity()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_layout() {
        let mut h = BlockHeader {
            version: 0,
            prev: Hash32::zero(),
            merkle_root: Hash32::zero(),
            time: 0,
            bits: 0,
            nonce: 0,
        };
        h.set_base_version(4, ChainId(0x62));
        assert_eq!(h.chain_id(), ChainId(0x62));
        assert_eq!(h.base_version(), 4);
        assert!(!h.is_auxpow());
        assert!(!h.is_legacy());

        h.set_auxpow_flag(true);
        assert!(h.is_auxpow());
        assert_eq!(h.chain_id(), ChainId(0x62));
        assert_eq!(h.base_version(), 4);

        h.version = 1;
        assert!(h.is_legacy());
        h.version = 2;
        assert!(h.is_legacy());
    }

    #[test]
    fn hash_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let h = Hash32(bytes);
        let s = h.to_string();
        assert!(s.ends_with("ab"));
        let parsed: Hash32 = s.parse().expect("parse");
        assert_eq!(parsed, h);
        assert_eq!(Hash32::default(), Hash32::zero());
    }

    #[test]
    fn amount_display() {
        assert_eq!(Amount::from_koinu(50_000_027_000_000).to_string(), "500000.27000000");
    }

    #[test]
    fn coinbase_detection() {
        let tx = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: vec![1, 2],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: Amount::from_coins(1),
                script_pubkey: vec![],
            }],
            lock_time: 0,
        };
        assert!(tx.is_coinbase());
        tx.validate_sanity().expect("sane");
    }

    #[test]
    fn repeated_input_is_rejected() {
        let input = TxIn {
            prevout: OutPoint {
                txid: Hash32([7u8; 32]),
                vout: 0,
            },
            script_sig: vec![0x00],
            sequence: u32::MAX,
        };
        let mut tx = Transaction {
            version: 1,
            inputs: vec![input.clone()],
            outputs: vec![TxOut {
                value: Amount::from_coins(1),
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        tx.validate_sanity().expect("single input");

        tx.inputs.push(input);
        assert!(matches!(
            tx.validate_sanity(),
            Err(CoreError::InvalidValue("duplicate input"))
        ));

        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: vec![1, 2],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: Amount::from_coins(1),
                script_pubkey: vec![],
            }],
            lock_time: 0,
        };
        let block = Block {
            header: MergedHeader::plain(BlockHeader {
                version: 1,
                prev: Hash32::zero(),
                merkle_root: Hash32::zero(),
                time: 0,
                bits: 0x207f_ffff,
                nonce: 0,
            }),
            txs: vec![coinbase, tx],
        };
        assert!(matches!(
            block.validate_sanity(),
            Err(CoreError::InvalidValue("duplicate input"))
        ));
    }
}
