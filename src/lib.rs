//! Tincoin (TIN) Core Library
//!
//! A minimal cryptocurrency node: a UTXO ledger of Schnorr-signed
//! transactions, proof-of-work consensus with cumulative-difficulty
//! fork resolution, and gossip-based peer synchronization.
//!
//! TIN is the short form used in addresses and protocol identifiers.

pub mod chain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod ledger;
pub mod mining;
pub mod node;
pub mod p2p;
pub mod rpc;
pub mod storage;
pub mod wallet;

/// Protocol identifiers and node-local defaults. Consensus-relevant
/// values live in [`config::ChainParams`] instead.
pub mod constants {
    /// Number of decimal places per coin.
    pub const DECIMAL_PLACES: u8 = 8;

    /// Base units per coin.
    pub const COIN: u64 = 100_000_000;

    /// Chain name (short form used as address prefix).
    pub const CHAIN_NAME: &str = "TN";

    /// Full chain name.
    pub const CHAIN_FULL_NAME: &str = "Tincoin";

    /// Wire protocol version. Bump together with the network magic
    /// when frames or messages change incompatibly.
    pub const PROTOCOL_VERSION: u32 = 1;

    /// Default p2p listen port.
    pub const DEFAULT_P2P_PORT: u16 = 6001;

    /// Default JSON-RPC port.
    pub const DEFAULT_RPC_PORT: u16 = 3001;
}
