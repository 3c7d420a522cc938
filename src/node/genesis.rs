//! Genesis block construction.
//!
//! Every node derives the same genesis block from its chain
//! parameters, so two nodes agree on a chain root exactly when they
//! run with the same parameters. The genesis block carries no
//! transactions and is exempt from the proof-of-work check.

use crate::config::ChainParams;
use crate::consensus::Block;
use crate::crypto::Hash;

/// Build the genesis block for the given chain parameters.
///
/// The result is reproducible byte for byte: same parameters, same
/// genesis hash.
pub fn genesis_block(params: &ChainParams) -> Block {
    Block::new(
        0,
        Hash::zero(),
        params.genesis_timestamp,
        vec![],
        params.initial_difficulty,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        let params = ChainParams::default();
        let first = genesis_block(&params);
        let second = genesis_block(&params);

        assert_eq!(first.hash, second.hash);
        assert_eq!(first, second);
    }

    #[test]
    fn test_genesis_shape() {
        let params = ChainParams::default();
        let genesis = genesis_block(&params);

        assert!(genesis.is_genesis());
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, Hash::zero());
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.difficulty, params.initial_difficulty);
        assert_eq!(genesis.timestamp, params.genesis_timestamp);
    }

    #[test]
    fn test_different_params_different_genesis() {
        let mainnet = ChainParams::default();
        let mut other = ChainParams::default();
        other.genesis_timestamp += 1;

        assert_ne!(genesis_block(&mainnet).hash, genesis_block(&other).hash);
    }
}
