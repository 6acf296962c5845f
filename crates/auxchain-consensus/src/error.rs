//! Consensus error types.

use thiserror::Error;

/// Errors returned by consensus validation and target arithmetic.
///
/// Every variant is a terminal rejection of the candidate for the given inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Compact target encoding is negative, overflows 256 bits, or is zero.
    #[error("malformed compact target bits")]
    MalformedTarget,

    /// AuxPoW envelope submitted below the activation height.
    #[error("auxpow is not yet allowed at this height")]
    AuxPowNotYetAllowed,

    /// Parent header carries our own chain ID.
    #[error("auxpow parent has our chain id")]
    SelfMergeMiningForbidden,

    /// Parent coinbase is not committed by the parent's merkle root.
    #[error("coinbase not in parent block: {0}")]
    CoinbaseNotInParentBlock(&'static str),

    /// Parent coinbase does not commit to this block's hash.
    #[error("block not committed by parent: {0}")]
    BlockNotCommittedByParent(&'static str),

    /// Chain commitment is duplicated or its branch is oversized.
    #[error("ambiguous chain commitment: {0}")]
    AmbiguousChainCommitment(&'static str),

    /// Parent header does not satisfy its own target.
    #[error("parent proof of work invalid")]
    ParentPowInvalid,

    /// Header `bits` differ from the retarget engine's value.
    #[error("bad difficulty bits: expected {expected:#010x}, got {got:#010x}")]
    BadDifficultyBits {
        /// Bits required at this height.
        expected: u32,
        /// Bits carried by the header.
        got: u32,
    },

    /// Effective proof-of-work hash is above the required target.
    #[error("insufficient proof of work")]
    InsufficientWork,

    /// AuxPoW version flag and envelope presence disagree.
    #[error("auxpow version flag does not match envelope")]
    AuxPowVersionMismatch,

    /// Header chain ID differs from ours on a strict chain-ID network.
    #[error("header has wrong chain id")]
    WrongChainId,

    /// Difficulty window does not cover the ancestors the engine needs.
    #[error("incomplete header history for retarget")]
    IncompleteHistory,

    /// Timestamp not above median-time-past.
    #[error("block timestamp too old")]
    TimeTooOld,

    /// Timestamp too far in the future.
    #[error("block timestamp too far in the future")]
    TimeTooNew,

    /// Coinbase pays more than subsidy plus fees.
    #[error("coinbase pays too much")]
    CoinbaseOverpays,

    /// Header or block fields violated basic consensus constraints.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
}

impl ConsensusError {
    /// Whether the failure indicates forged or adversarial input.
    ///
    /// Consumed by peer-scoring policy outside this crate. Benign rejections
    /// such as [`ConsensusError::AuxPowNotYetAllowed`] return `false`.
    pub fn is_adversarial(&self) -> bool {
        matches!(
            self,
            ConsensusError::SelfMergeMiningForbidden
                | ConsensusError::AmbiguousChainCommitment(_)
                | ConsensusError::CoinbaseNotInParentBlock(_)
                | ConsensusError::BlockNotCommittedByParent(_)
                | ConsensusError::ParentPowInvalid
                | ConsensusError::MalformedTarget
        )
    }
}

/// Convenience alias.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
