//! Block validation.
//!
//! Pure functions: a block is checked against its predecessor, the
//! difficulty the chain demands at its height, and the UTXO state it
//! builds on. Nothing here mutates chain state.

use thiserror::Error;

use crate::config::ChainParams;
use crate::consensus::{block_reward, Block};
use crate::ledger::{TxError, UtxoSet};

/// Block validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Block index {got} does not follow height {expected}")]
    InvalidIndex { expected: u64, got: u64 },
    #[error("Block does not link to the previous block hash")]
    InvalidLink,
    #[error("Block timestamp is outside the tolerated window")]
    InvalidTimestamp,
    #[error("Proof of work does not satisfy the required difficulty")]
    InvalidProofOfWork,
    #[error("Missing, misplaced, or overpaying reward transaction")]
    InvalidRewardTransaction,
    #[error(transparent)]
    Tx(#[from] TxError),
}

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Validate a block as the successor of `prev`.
///
/// `expected_difficulty` is recomputed by the caller from its own
/// chain; the difficulty claimed inside the block is never trusted.
/// `utxo` is the set as of `prev`; transactions are checked in block
/// order against a scratch copy, so later transactions may spend
/// outputs created earlier in the same block, and an output spent
/// twice within the block is rejected.
pub fn validate_block(
    block: &Block,
    prev: &Block,
    expected_difficulty: u32,
    utxo: &UtxoSet,
    params: &ChainParams,
) -> Result<(), BlockError> {
    if block.index != prev.index + 1 {
        return Err(BlockError::InvalidIndex {
            expected: prev.index + 1,
            got: block.index,
        });
    }
    if block.previous_hash != prev.hash {
        return Err(BlockError::InvalidLink);
    }

    let tolerance = params.timestamp_tolerance_secs;
    if block.timestamp.saturating_add(tolerance) < prev.timestamp {
        return Err(BlockError::InvalidTimestamp);
    }
    if block.timestamp > unix_now().saturating_add(tolerance) {
        return Err(BlockError::InvalidTimestamp);
    }

    if block.difficulty != expected_difficulty || !block.has_valid_pow(expected_difficulty) {
        return Err(BlockError::InvalidProofOfWork);
    }

    let max_reward = block_reward(params, block.index);
    let mut scratch = utxo.clone();

    // Once the emission schedule reaches zero, blocks stop carrying a
    // reward transaction; until then exactly one leads the block.
    let regular = if max_reward == 0 {
        &block.transactions[..]
    } else {
        let reward_tx = block
            .reward_transaction()
            .ok_or(BlockError::InvalidRewardTransaction)?;
        if scratch.validate_transaction(reward_tx, max_reward).is_err() {
            return Err(BlockError::InvalidRewardTransaction);
        }
        scratch.apply_transaction(reward_tx);
        &block.transactions[1..]
    };

    if regular.iter().any(|tx| tx.is_reward()) {
        return Err(BlockError::InvalidRewardTransaction);
    }
    for tx in regular {
        scratch.validate_transaction(tx, max_reward)?;
        scratch.apply_transaction(tx);
    }

    Ok(())
}
