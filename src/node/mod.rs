//! Node state, events, and genesis construction.

mod genesis;
mod node;

pub use genesis::*;
pub use node::*;
