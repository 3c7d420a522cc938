//! Difficulty adjustment and work accounting.
//!
//! Difficulty counts the required leading zero bits of a block hash,
//! so one unit doubles the expected work. Retargeting compares the
//! realized timespan of the closing interval against the configured
//! target and moves at most two bits per adjustment, which bounds the
//! work change to a factor of four in either direction.

use crate::config::ChainParams;
use crate::consensus::Block;

/// Hard upper bound: a 256-bit hash cannot have more leading zeros.
const MAX_DIFFICULTY: u32 = 255;

/// Expected work for a block mined at `difficulty` leading zero bits
pub fn block_work(difficulty: u32) -> u128 {
    1u128.checked_shl(difficulty).unwrap_or(u128::MAX)
}

/// Total work of a chain, the fork-selection metric
pub fn cumulative_difficulty(blocks: &[Block]) -> u128 {
    blocks
        .iter()
        .fold(0u128, |acc, b| acc.saturating_add(block_work(b.difficulty)))
}

/// Difficulty required of the next block to extend `blocks`.
///
/// Pure function of the existing chain. Validators recompute this and
/// never trust the difficulty claimed by an incoming block.
pub fn next_difficulty(blocks: &[Block], params: &ChainParams) -> u32 {
    let head = match blocks.last() {
        Some(head) => head,
        None => return params.initial_difficulty,
    };

    let next_index = head.index + 1;
    if params.retarget_interval == 0 || next_index % params.retarget_interval != 0 {
        return head.difficulty;
    }

    let start = blocks
        .len()
        .saturating_sub(params.retarget_interval as usize);
    let interval_start = &blocks[start];
    let actual_span = head.timestamp.saturating_sub(interval_start.timestamp);

    retarget(head.difficulty, actual_span, params)
}

/// Adjust `current` difficulty given the realized interval timespan.
pub fn retarget(current: u32, actual_span: u64, params: &ChainParams) -> u32 {
    let expected = params
        .target_block_interval_secs
        .saturating_mul(params.retarget_interval);

    let next = if actual_span.saturating_mul(4) <= expected {
        current.saturating_add(2)
    } else if actual_span.saturating_mul(2) <= expected {
        current.saturating_add(1)
    } else if actual_span >= expected.saturating_mul(4) {
        current.saturating_sub(2)
    } else if actual_span >= expected.saturating_mul(2) {
        current.saturating_sub(1)
    } else {
        current
    };

    next.max(params.min_difficulty).min(MAX_DIFFICULTY)
}
