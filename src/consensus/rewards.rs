//! Block reward schedule.
//!
//! Pure, deterministic function of the block index and the configured
//! parameters. Every validator recomputes it to cap the reward
//! transaction of an incoming block.

use crate::config::ChainParams;

/// Reward allowed for the block at `index`.
///
/// The base reward optionally halves every `halving_interval` blocks.
/// Genesis carries no transactions, so its reward is zero. A halving
/// schedule eventually shifts down to zero; from that height on blocks
/// carry no reward transaction at all.
pub fn block_reward(params: &ChainParams, index: u64) -> u64 {
    if index == 0 {
        return 0;
    }

    match params.halving_interval {
        None => params.base_reward,
        Some(interval) if interval == 0 => params.base_reward,
        Some(interval) => {
            let halvings = index / interval;
            if halvings >= 64 {
                0
            } else {
                params.base_reward >> halvings
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> ChainParams {
        ChainParams {
            base_reward: 5_000_000_000,
            halving_interval: None,
            ..ChainParams::default()
        }
    }

    fn halving(interval: u64) -> ChainParams {
        ChainParams {
            base_reward: 5_000_000_000,
            halving_interval: Some(interval),
            ..ChainParams::default()
        }
    }

    #[test]
    fn test_genesis_has_no_reward() {
        assert_eq!(block_reward(&fixed(), 0), 0);
        assert_eq!(block_reward(&halving(10), 0), 0);
    }

    #[test]
    fn test_fixed_reward_never_changes() {
        let params = fixed();
        assert_eq!(block_reward(&params, 1), 5_000_000_000);
        assert_eq!(block_reward(&params, 1_000_000), 5_000_000_000);
    }

    #[test]
    fn test_halving_schedule() {
        let params = halving(10);
        assert_eq!(block_reward(&params, 1), 5_000_000_000);
        assert_eq!(block_reward(&params, 9), 5_000_000_000);
        assert_eq!(block_reward(&params, 10), 2_500_000_000);
        assert_eq!(block_reward(&params, 20), 1_250_000_000);
    }

    #[test]
    fn test_reward_reaches_zero() {
        let params = halving(1);
        // base_reward is under 2^33, so 33 halvings exhaust it
        assert_eq!(block_reward(&params, 33), 0);
        assert_eq!(block_reward(&params, 1_000), 0);
    }

    #[test]
    fn test_extreme_heights_do_not_overflow() {
        let params = halving(1);
        assert_eq!(block_reward(&params, u64::MAX), 0);
    }

    #[test]
    fn test_zero_interval_treated_as_fixed() {
        let params = halving(0);
        assert_eq!(block_reward(&params, 100), 5_000_000_000);
    }
}
