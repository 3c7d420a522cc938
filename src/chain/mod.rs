//! Chain state and the pending transaction pool.

mod mempool;
mod state;

pub use mempool::*;
pub use state::*;
