#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Consensus rules for a merge-mined proof-of-work chain.
//!
//! This crate is responsible for:
//! - compact difficulty target encoding/decoding (Bitcoin-style `bits`)
//! - AuxPoW envelope validation against a parent-chain block
//! - difficulty retargeting across the legacy and Digishield eras
//! - header proof-of-work and timestamp validation
//! - block subsidy and coinbase maturity
//!
//! It intentionally does **not** include networking, storage, or mempool policy.
//! Every function is pure over its inputs; network parameters are passed in.

pub mod auxpow;
pub mod difficulty;
pub mod error;
pub mod params;
pub mod pow;
pub mod reward;
pub mod target;
pub mod validate;
pub mod work;

pub use auxpow::*;
pub use difficulty::*;
pub use error::*;
pub use params::*;
pub use pow::*;
pub use reward::*;
pub use target::*;
pub use validate::*;
pub use work::*;
