//! Node and chain configuration.
//!
//! Consensus constants are network-agreed values: every node on a
//! network must run with the same `ChainParams` or it will reject the
//! other nodes' blocks. Node-local settings live in `NodeConfig`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read params file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse params file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Network-agreed consensus parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Timestamp of the genesis block
    pub genesis_timestamp: u64,
    /// Difficulty of the genesis block and the first interval
    pub initial_difficulty: u32,
    /// Difficulty never retargets below this floor
    pub min_difficulty: u32,
    /// Desired seconds between blocks
    pub target_block_interval_secs: u64,
    /// Blocks between difficulty retargets
    pub retarget_interval: u64,
    /// Allowed clock skew for block timestamps, in seconds
    pub timestamp_tolerance_secs: u64,
    /// Reward for mining a block, in base units
    pub base_reward: u64,
    /// Halve the reward every this many blocks; `None` keeps it fixed
    pub halving_interval: Option<u64>,
    /// Most transactions a miner will pack into one block
    pub max_block_transactions: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            genesis_timestamp: 1735689600, // 2025-01-01
            initial_difficulty: 16,
            min_difficulty: 1,
            target_block_interval_secs: 30,
            retarget_interval: 10,
            timestamp_tolerance_secs: 60,
            base_reward: 5_000_000_000, // 50 TIN
            halving_interval: None,
            max_block_transactions: 500,
        }
    }
}

impl ChainParams {
    /// Load parameters from a JSON file. Missing fields fall back to
    /// the defaults, so a file may override only what it needs.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Parameters suited to tests: trivial difficulty so blocks mine
    /// in a handful of hash attempts.
    pub fn test() -> Self {
        Self {
            initial_difficulty: 1,
            min_difficulty: 1,
            ..Self::default()
        }
    }
}

/// Node-local settings, assembled from the command line
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// P2p listen address
    pub listen_addr: SocketAddr,
    /// JSON-RPC listen port
    pub rpc_port: u16,
    /// Bootstrap peers to connect to at startup
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Block database directory; `None` keeps the chain in memory
    pub data_dir: Option<PathBuf>,
    /// Maximum simultaneously connected peers
    pub max_peers: usize,
    /// Maximum transactions held in the mempool
    pub mempool_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], constants::DEFAULT_P2P_PORT)),
            rpc_port: constants::DEFAULT_RPC_PORT,
            bootstrap_peers: vec![],
            data_dir: None,
            max_peers: 32,
            mempool_capacity: 1000,
        }
    }
}
