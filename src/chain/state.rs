//! The selected chain and its derived UTXO state.
//!
//! Blocks and the UTXO set only ever change together. Fork resolution
//! replays the candidate wholesale from genesis into a fresh UTXO set
//! and swaps both at once, so there is no undo bookkeeping.

use thiserror::Error;

use crate::config::ChainParams;
use crate::consensus::{self, validate_block, Block, BlockError, HeadInfo};
use crate::crypto::{Address, Hash};
use crate::ledger::{Transaction, UtxoSet};
use crate::node::genesis_block;

/// Chain-level consensus rejections
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block does not extend the current head")]
    NotExtendingHead,
    #[error("Candidate work {theirs} does not exceed current work {ours}")]
    NotHeavier { ours: u128, theirs: u128 },
    #[error("Candidate chain starts from a different genesis block")]
    ForeignGenesis,
    #[error("Candidate chain is empty")]
    EmptyCandidate,
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// The locally selected chain
#[derive(Debug, Clone)]
pub struct Chain {
    params: ChainParams,
    blocks: Vec<Block>,
    utxo: UtxoSet,
}

impl Chain {
    /// A fresh chain holding only the genesis block
    pub fn new(params: ChainParams) -> Self {
        let genesis = genesis_block(&params);
        Self {
            params,
            blocks: vec![genesis],
            utxo: UtxoSet::new(),
        }
    }

    /// Rebuild a chain by replaying `blocks` from genesis.
    ///
    /// Every block and transaction is validated along the way and the
    /// UTXO set is derived from scratch. Replaying the same blocks
    /// always yields the same set.
    pub fn from_blocks(params: ChainParams, blocks: Vec<Block>) -> Result<Self, ChainError> {
        let mut iter = blocks.into_iter();
        let first = iter.next().ok_or(ChainError::EmptyCandidate)?;
        if first != genesis_block(&params) {
            return Err(ChainError::ForeignGenesis);
        }

        let mut chain = Self {
            params,
            blocks: vec![first],
            utxo: UtxoSet::new(),
        };
        for block in iter {
            chain.try_append(block)?;
        }
        Ok(chain)
    }

    /// Network parameters this chain runs under
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The head (most recently appended) block
    pub fn head(&self) -> &Block {
        match self.blocks.last() {
            Some(head) => head,
            // A Chain is constructed with genesis and only grows or swaps
            None => unreachable!("chain is never empty"),
        }
    }

    /// Index of the head block
    pub fn height(&self) -> u64 {
        self.head().index
    }

    /// Chain head metadata for peer announcements
    pub fn head_info(&self) -> HeadInfo {
        let head = self.head();
        HeadInfo {
            index: head.index,
            hash: head.hash,
            cumulative_difficulty: self.cumulative_difficulty(),
        }
    }

    /// Total work of this chain, the fork-selection metric
    pub fn cumulative_difficulty(&self) -> u128 {
        consensus::cumulative_difficulty(&self.blocks)
    }

    /// Difficulty required of the next block
    pub fn next_difficulty(&self) -> u32 {
        consensus::next_difficulty(&self.blocks, &self.params)
    }

    /// The unspent outputs as of the head block
    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    /// All blocks, genesis first
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block at a given index
    pub fn block_at(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Blocks from `from_index` through the head, for bulk transfer
    pub fn blocks_from(&self, from_index: u64) -> &[Block] {
        let start = (from_index as usize).min(self.blocks.len());
        &self.blocks[start..]
    }

    /// Spendable balance of an address under this chain
    pub fn balance_of(&self, address: &Address) -> u64 {
        self.utxo.balance_of(address)
    }

    /// Locate a mined transaction by id
    pub fn find_transaction(&self, id: &Hash) -> Option<(&Block, &Transaction)> {
        self.blocks.iter().rev().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.id == *id)
                .map(|tx| (block, tx))
        })
    }

    /// Confirmation count of a mined transaction: the number of blocks
    /// from its containing block through the head, or `None` if the
    /// transaction is not on the chain.
    pub fn confirmations(&self, id: &Hash) -> Option<u64> {
        self.find_transaction(id)
            .map(|(block, _)| self.height() + 1 - block.index)
    }

    /// Validate `block` as the new head and apply it.
    ///
    /// The block must link to the current head; anything else is a
    /// `NotExtendingHead` rejection and leaves the chain untouched, as
    /// does any validation failure.
    pub fn try_append(&mut self, block: Block) -> Result<(), ChainError> {
        {
            let head = self.head();
            if block.previous_hash != head.hash || block.index != head.index + 1 {
                return Err(ChainError::NotExtendingHead);
            }
        }

        let expected = self.next_difficulty();
        validate_block(&block, self.head(), expected, &self.utxo, &self.params)?;

        for tx in &block.transactions {
            self.utxo.apply_transaction(tx);
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Replace this chain with `candidate` if it is strictly heavier.
    ///
    /// The candidate is replayed from genesis; on success the blocks
    /// and the freshly derived UTXO set are swapped in together. Ties
    /// lose: the chain we already hold wins at equal work.
    pub fn try_replace(&mut self, candidate: Vec<Block>) -> Result<(), ChainError> {
        let replacement = Chain::from_blocks(self.params.clone(), candidate)?;

        let ours = self.cumulative_difficulty();
        let theirs = replacement.cumulative_difficulty();
        if theirs <= ours {
            return Err(ChainError::NotHeavier { ours, theirs });
        }

        *self = replacement;
        Ok(())
    }
}
