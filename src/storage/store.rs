//! Block log persistence over sled.
//!
//! The store is an append-or-rewrite log of blocks keyed by index;
//! the UTXO set is never written to disk. On restart the node replays
//! the stored blocks from genesis, which both rebuilds the UTXO set
//! and re-validates everything the disk claims.

use std::path::Path;

use sled::{Db, Tree};
use thiserror::Error;

use crate::consensus::Block;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage engine error: {0}")]
    Db(#[from] sled::Error),
    #[error("Corrupt block record: {0}")]
    Codec(#[from] bincode::Error),
}

const BLOCKS_TREE: &str = "blocks";

/// Sled-backed block log keyed by big-endian block index
#[derive(Debug, Clone)]
pub struct BlockStore {
    db: Db,
    blocks: Tree,
}

impl BlockStore {
    /// Open or create a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        Ok(Self { db, blocks })
    }

    /// In-memory store for tests; contents vanish with the last handle
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        Ok(Self { db, blocks })
    }

    /// Persist one block under its index
    pub fn append_block(&self, block: &Block) -> Result<(), StoreError> {
        let value = bincode::serialize(block)?;
        self.blocks.insert(block.index.to_be_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Drop the whole log and rewrite it with `blocks`
    pub fn replace_chain(&self, blocks: &[Block]) -> Result<(), StoreError> {
        self.blocks.clear()?;
        for block in blocks {
            let value = bincode::serialize(block)?;
            self.blocks.insert(block.index.to_be_bytes(), value)?;
        }
        self.db.flush()?;
        Ok(())
    }

    /// Load the full chain, genesis first.
    ///
    /// Big-endian keys make sled's natural iteration order the chain
    /// order, so no sort is needed.
    pub fn load_chain(&self) -> Result<Vec<Block>, StoreError> {
        let mut chain = Vec::new();
        for item in self.blocks.iter() {
            let (_, value) = item?;
            chain.push(bincode::deserialize(&value)?);
        }
        Ok(chain)
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
