//! Wallet module - key management and transaction building

mod wallet;

pub use wallet::*;
