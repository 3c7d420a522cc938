//! Consensus module - blocks, validation, difficulty, and rewards

mod block;
mod difficulty;
mod rewards;
mod validation;

pub use block::*;
pub use difficulty::*;
pub use rewards::*;
pub use validation::*;
