//! Block structure.
//!
//! A block commits to its transactions through the merkle root of
//! their wire hashes. The stored hash field is a cache; validation
//! always recomputes it.

use serde::{Deserialize, Serialize};

use crate::crypto::{compute_merkle_root, hash_bytes, Hash};
use crate::ledger::Transaction;

/// A complete block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Height of this block (genesis is 0)
    pub index: u64,
    /// Hash of the previous block (zero for genesis)
    pub previous_hash: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Transactions, reward first
    pub transactions: Vec<Transaction>,
    /// Required leading zero bits of the block hash
    pub difficulty: u32,
    /// Nonce used for PoW
    pub nonce: u64,
    /// Cached block hash
    pub hash: Hash,
}

impl Block {
    /// Create a new block with its hash computed
    pub fn new(
        index: u64,
        previous_hash: Hash,
        timestamp: u64,
        transactions: Vec<Transaction>,
        difficulty: u32,
        nonce: u64,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            transactions,
            difficulty,
            nonce,
            hash: Hash::zero(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Merkle root over the transaction wire hashes
    pub fn merkle_root(&self) -> Hash {
        let leaves: Vec<Hash> = self.transactions.iter().map(|tx| tx.wire_hash()).collect();
        compute_merkle_root(&leaves)
    }

    /// Serialize the header fields for hashing
    fn header_bytes(&self) -> Vec<u8> {
        let merkle_root = self.merkle_root();
        let mut bytes = Vec::with_capacity(92);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.previous_hash.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&merkle_root.0);
        bytes.extend_from_slice(&self.difficulty.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Recompute the block hash from content
    pub fn compute_hash(&self) -> Hash {
        hash_bytes(&self.header_bytes())
    }

    /// Check the cached hash against the content and the proof-of-work
    /// requirement of `expected_difficulty` leading zero bits.
    pub fn has_valid_pow(&self, expected_difficulty: u32) -> bool {
        let computed = self.compute_hash();
        self.hash == computed && computed.leading_zero_bits() >= expected_difficulty
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == Hash::zero()
    }

    /// The leading reward transaction, if the block has one
    pub fn reward_transaction(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_reward())
    }
}

/// Chain head metadata, announced to peers and compared during sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadInfo {
    /// Index of the head block
    pub index: u64,
    /// Hash of the head block
    pub hash: Hash,
    /// Total work of the chain ending at the head
    pub cumulative_difficulty: u128,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;

    fn sample_block(nonce: u64) -> Block {
        let miner = PrivateKey::generate().address();
        Block::new(
            1,
            hash_bytes(b"prev"),
            1234567890,
            vec![Transaction::reward(miner, 5000, 1)],
            0,
            nonce,
        )
    }

    #[test]
    fn test_hash_deterministic() {
        let block = sample_block(0);
        assert_eq!(block.hash, block.compute_hash());
        assert_eq!(block.compute_hash(), block.compute_hash());
    }

    #[test]
    fn test_hash_covers_nonce() {
        let a = sample_block(0);
        let b = sample_block(1);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_covers_transactions() {
        let mut block = sample_block(0);
        let original = block.hash;

        block.transactions.clear();
        assert_ne!(block.compute_hash(), original);
    }

    #[test]
    fn test_tampered_cached_hash_fails_pow() {
        let mut block = sample_block(0);
        assert!(block.has_valid_pow(0));

        block.hash = hash_bytes(b"forged");
        assert!(!block.has_valid_pow(0));
    }

    #[test]
    fn test_genesis_detection() {
        let genesis = Block::new(0, Hash::zero(), 0, vec![], 0, 0);
        assert!(genesis.is_genesis());

        let block = sample_block(0);
        assert!(!block.is_genesis());
    }

    #[test]
    fn test_reward_transaction_accessor() {
        let block = sample_block(0);
        assert!(block.reward_transaction().is_some());

        let empty = Block::new(2, hash_bytes(b"prev"), 0, vec![], 0, 0);
        assert!(empty.reward_transaction().is_none());
    }
}
