//! Ledger module - transactions and the UTXO set

mod transaction;
mod utxo;

pub use transaction::*;
pub use utxo::*;
