#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Core: canonical types, constants, wire encoding, hashing and Merkle trees
//! for a merge-mined proof-of-work chain.

pub mod constants;
pub mod merkle;
pub mod serialization;
pub mod types;

pub use constants::*;
pub use merkle::*;
pub use serialization::*;
pub use types::*;
