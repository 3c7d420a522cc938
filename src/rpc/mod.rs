//! JSON-RPC module - the HTTP interface for external applications

mod methods;
mod server;

pub use methods::*;
pub use server::*;
