//! P2P networking module - gossip, sync and peer management

mod peer;
mod protocol;
mod server;
mod sync;

pub use peer::*;
pub use protocol::*;
pub use server::*;
pub use sync::*;
