//! Protocol-wide constants.

/// Length in bytes of a 32-byte hash.
pub const HASH32_LEN: usize = 32;

/// Length in bytes of a serialized block header.
pub const HEADER_LEN: usize = 80;

/// Number of atomic units ("koinu") per coin.
pub const COIN: u64 = 100_000_000;

/// Upper bound on any amount of money.
pub const MAX_MONEY: u64 = 10_000_000_000 * COIN;

/// Version bit marking a header that carries an AuxPoW envelope.
pub const VERSION_AUXPOW: i32 = 1 << 8;

/// Multiplier used to encode the chain ID into the header version.
pub const VERSION_CHAIN_START: i32 = 1 << 16;

/// Magic bytes preceding the chain merkle root in a parent coinbase script.
pub const MERGED_MINING_HEADER: [u8; 4] = [0xfa, 0xbe, b'm', b'm'];

/// Maximum length of the chain merkle branch (bounds merge-mining fan-out).
pub const MAX_CHAIN_MERKLE_BRANCH: usize = 30;

/// Maximum length of the coinbase merkle branch inside a parent block.
pub const MAX_COINBASE_MERKLE_BRANCH: usize = 30;

/// Without a merged-mining header, the chain root must start within this many bytes.
pub const LEGACY_ROOT_MAX_OFFSET: usize = 20;

/// Maximum serialized transaction size accepted when decoding.
///
/// This is a DoS-prevention bound, not a protocol limitation.
pub const MAX_TX_BYTES: usize = 1_000_000;

/// Maximum number of inputs or outputs accepted when decoding a transaction.
pub const MAX_TX_IO: usize = 10_000;

/// Maximum script length accepted when decoding.
pub const MAX_SCRIPT_BYTES: usize = 10_000;
