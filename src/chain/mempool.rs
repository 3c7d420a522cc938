//! Pending transaction pool.
//!
//! Holds validated, not-yet-mined transactions keyed by id in arrival
//! order. The pool is bounded: at capacity the oldest entry is evicted
//! to admit a newcomer. No two pending transactions may claim the same
//! output, so miners can take entries front-to-back without conflict.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::crypto::Hash;
use crate::ledger::{OutputRef, Transaction, TxError, UtxoSet};

/// Default pool capacity when none is configured
pub const DEFAULT_MEMPOOL_CAPACITY: usize = 1000;

/// Mempool admission errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Reward transactions are only valid inside blocks")]
    RewardNotAllowed,
    #[error("Spends an output already claimed by a pending transaction")]
    ConflictsWithPending,
    #[error(transparent)]
    Tx(#[from] TxError),
}

/// Bounded pool of pending transactions
#[derive(Debug)]
pub struct Mempool {
    capacity: usize,
    by_id: HashMap<Hash, Transaction>,
    order: VecDeque<Hash>,
    claimed: HashSet<OutputRef>,
}

impl Mempool {
    /// Create a pool with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_CAPACITY)
    }

    /// Create a pool bounded to `capacity` transactions
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_id: HashMap::new(),
            order: VecDeque::new(),
            claimed: HashSet::new(),
        }
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Check if a transaction id is pending
    pub fn contains(&self, id: &Hash) -> bool {
        self.by_id.contains_key(id)
    }

    /// Get a pending transaction by id
    pub fn get(&self, id: &Hash) -> Option<&Transaction> {
        self.by_id.get(id)
    }

    /// Admit a transaction validated against `utxo`.
    ///
    /// Returns `Ok(false)` if the id is already pending (so callers
    /// can suppress re-broadcast), `Ok(true)` for a new admission. At
    /// capacity the oldest entry is evicted to make room.
    pub fn insert(&mut self, tx: Transaction, utxo: &UtxoSet) -> Result<bool, MempoolError> {
        if self.by_id.contains_key(&tx.id) {
            return Ok(false);
        }
        if tx.is_reward() {
            return Err(MempoolError::RewardNotAllowed);
        }

        utxo.validate_transaction(&tx, 0)?;

        for input in &tx.inputs {
            if self.claimed.contains(&(input.output_id, input.output_index)) {
                return Err(MempoolError::ConflictsWithPending);
            }
        }

        while self.by_id.len() >= self.capacity {
            self.evict_oldest();
        }

        for input in &tx.inputs {
            self.claimed.insert((input.output_id, input.output_index));
        }
        self.order.push_back(tx.id);
        self.by_id.insert(tx.id, tx);
        Ok(true)
    }

    /// Pending transactions, oldest first
    pub fn in_arrival_order(&self) -> Vec<Transaction> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    /// Pending transaction ids, oldest first
    pub fn ids(&self) -> Vec<Hash> {
        self.order
            .iter()
            .filter(|id| self.by_id.contains_key(id))
            .copied()
            .collect()
    }

    /// Re-filter the pool after the chain changed.
    ///
    /// Entries that were mined or that no longer validate against the
    /// new UTXO set are dropped; the rest keep their arrival order.
    pub fn recompute(&mut self, utxo: &UtxoSet) {
        let order = std::mem::take(&mut self.order);
        let mut by_id = std::mem::take(&mut self.by_id);
        self.claimed.clear();

        for id in order {
            let tx = match by_id.remove(&id) {
                Some(tx) => tx,
                None => continue,
            };
            // Re-admission applies the same rules as the original
            // insert; failures just drop the entry.
            let _ = self.insert(tx, utxo);
        }
    }

    fn evict_oldest(&mut self) {
        while let Some(id) = self.order.pop_front() {
            if let Some(tx) = self.by_id.remove(&id) {
                for input in &tx.inputs {
                    self.claimed.remove(&(input.output_id, input.output_index));
                }
                log::debug!("mempool full, evicted oldest transaction {}", id);
                return;
            }
        }
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}
