//! Node error types.

use auxchain_consensus::ConsensusError;
use auxchain_core::{CoreError, Hash32};
use thiserror::Error;

/// Errors surfaced by storage, policy and the RPC layer.
#[derive(Debug, Error)]
pub enum NodeError {
    /// sled failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Record (de)serialization failure.
    #[error("record codec error: {0}")]
    Codec(#[from] std::io::Error),

    /// JSON encoding failure on the RPC surface.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Block or header rejected by consensus.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Wire decoding or structural failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Block violates a rule that needs chain state (inputs, fees).
    #[error("invalid block: {0}")]
    InvalidBlock(&'static str),

    /// Amount argument that is zero where forbidden or does not parse.
    #[error("Invalid amount for -{name}=<amount>: '{value}'")]
    InvalidAmount {
        /// Option name without the leading dash.
        name: &'static str,
        /// The raw value supplied.
        value: String,
    },

    /// Parent of a block is not in the store.
    #[error("unknown parent block {0}")]
    UnknownParent(Hash32),

    /// Block is already stored.
    #[error("block {0} already known")]
    DuplicateBlock(Hash32),

    /// Stored chain was created with a different genesis.
    #[error("genesis block does not match stored chain")]
    GenesisMismatch,

    /// Store contents are inconsistent.
    #[error("corrupt store: {0}")]
    Corrupt(&'static str),

    /// Feature not active at the current height.
    #[error("{0}")]
    NotYetAvailable(&'static str),

    /// Submitted aux block hash was never handed out.
    #[error("block hash unknown")]
    UnknownAuxBlock,

    /// Bad request or configuration parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A mutex was poisoned by a panicking thread.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Convenience alias.
pub type NodeResult<T> = Result<T, NodeError>;
