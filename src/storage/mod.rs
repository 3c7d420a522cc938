//! Storage module - the persistent block log

mod store;

pub use store::*;
