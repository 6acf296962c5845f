#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Node for a merge-mined chain: block store, UTXO view, mempool and fee
//! policy, local and merged mining, and a JSON-line RPC surface.

pub mod auxmining;
pub mod chain_store;
pub mod config;
pub mod error;
pub mod fees;
pub mod mempool;
pub mod mining;
pub mod rpc;
pub mod utxo;

pub use chain_store::{block_hash, ChainStore};
pub use error::{NodeError, NodeResult};
