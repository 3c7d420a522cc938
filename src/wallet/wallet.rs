//! Wallet implementation.
//!
//! Holds private keys, reads balances out of the UTXO set and builds
//! signed transactions. The wallet is a client of the chain and has no
//! say in consensus.

use std::fs;
use std::path::Path;

use hex::FromHex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Address, PrivateKey, Signature, SignatureError};
use crate::ledger::{OutputRef, Transaction, TxInput, TxOutput, UtxoSet};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Signing error: {0}")]
    Signing(#[from] SignatureError),
    #[error("Wallet file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed wallet file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Malformed key encoding: {0}")]
    Encoding(#[from] hex::FromHexError),
}

/// On-disk wallet format: hex-encoded private keys
#[derive(Serialize, Deserialize)]
struct WalletFile {
    keys: Vec<String>,
}

/// A collection of spending keys
#[derive(Debug, Clone, Default)]
pub struct Wallet {
    keys: Vec<PrivateKey>,
}

impl Wallet {
    /// Create a new empty wallet
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Generate a fresh key and return its address
    pub fn generate_key(&mut self) -> Address {
        let key = PrivateKey::generate();
        let address = key.address();
        self.keys.push(key);
        address
    }

    /// Add an existing key. Re-importing a held key changes nothing.
    pub fn import_key(&mut self, key: PrivateKey) -> Address {
        let address = key.address();
        if !self.contains(&address) {
            self.keys.push(key);
        }
        address
    }

    /// All addresses this wallet can spend from
    pub fn addresses(&self) -> Vec<Address> {
        self.keys.iter().map(|k| k.address()).collect()
    }

    /// The first address, if any key exists
    pub fn first_address(&self) -> Option<Address> {
        self.keys.first().map(|k| k.address())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.keys.iter().any(|k| k.address() == *address)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Spendable balance across all keys
    pub fn balance(&self, utxo: &UtxoSet) -> u64 {
        self.keys
            .iter()
            .map(|k| utxo.balance_of(&k.address()))
            .sum()
    }

    /// Build and sign a transfer of `amount` to `to`.
    ///
    /// Outputs are gathered greedily across all keys until the amount
    /// is covered and anything above it returns as change to the owner
    /// of the first spent output.
    pub fn create_transaction(
        &self,
        utxo: &UtxoSet,
        to: Address,
        amount: u64,
    ) -> Result<Transaction, WalletError> {
        let mut selected: Vec<(OutputRef, &PrivateKey)> = Vec::new();
        let mut gathered: u64 = 0;

        'keys: for key in &self.keys {
            for (output_ref, entry) in utxo.entries_for(&key.address()) {
                if gathered >= amount {
                    break 'keys;
                }
                gathered += entry.amount;
                selected.push((output_ref, key));
            }
        }

        if gathered < amount {
            return Err(WalletError::InsufficientFunds {
                have: gathered,
                need: amount,
            });
        }

        let mut outputs = vec![TxOutput {
            address: to,
            amount,
        }];
        let change = gathered - amount;
        if change > 0 {
            let owner = selected[0].1.address();
            outputs.push(TxOutput {
                address: owner,
                amount: change,
            });
        }

        let inputs = selected
            .iter()
            .map(|((id, index), key)| TxInput {
                output_id: *id,
                output_index: *index,
                owner: key.address(),
                signature: Signature([0u8; 64]),
            })
            .collect();

        // The id excludes signatures, so signing after construction
        // leaves it valid
        let mut tx = Transaction::new(inputs, outputs);
        let signing_hash = tx.signing_hash();
        for (i, (_, key)) in selected.iter().enumerate() {
            tx.inputs[i].signature = key.sign(&signing_hash)?;
        }
        Ok(tx)
    }

    /// Save all keys to `path` as hex-encoded JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let file = WalletFile {
            keys: self.keys.iter().map(|k| hex::encode(k.to_bytes())).collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load a wallet from `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let file: WalletFile = serde_json::from_str(&fs::read_to_string(path)?)?;

        let mut keys = Vec::with_capacity(file.keys.len());
        for encoded in &file.keys {
            let bytes = <[u8; 32]>::from_hex(encoded)?;
            keys.push(PrivateKey::from_bytes(&bytes)?);
        }
        Ok(Self { keys })
    }

    /// Load the wallet at `path`, or create one with a single fresh
    /// key and save it there
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut wallet = Self::new();
        wallet.generate_key();
        wallet.save(path)?;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// UTXO set holding mining rewards for the given addresses
    fn funded(rewards: &[(Address, u64)]) -> UtxoSet {
        let mut utxo = UtxoSet::new();
        for (index, (address, amount)) in rewards.iter().enumerate() {
            utxo.apply_transaction(&Transaction::reward(*address, *amount, index as u64 + 1));
        }
        utxo
    }

    #[test]
    fn test_generate_key_adds_address() {
        let mut wallet = Wallet::new();
        assert!(wallet.is_empty());

        let address = wallet.generate_key();
        assert_eq!(wallet.addresses(), vec![address]);
        assert_eq!(wallet.first_address(), Some(address));
    }

    #[test]
    fn test_import_is_idempotent() {
        let mut wallet = Wallet::new();
        let key = PrivateKey::generate();

        let a1 = wallet.import_key(key.clone());
        let a2 = wallet.import_key(key);
        assert_eq!(a1, a2);
        assert_eq!(wallet.addresses().len(), 1);
    }

    #[test]
    fn test_balance_sums_all_keys() {
        let mut wallet = Wallet::new();
        let a = wallet.generate_key();
        let b = wallet.generate_key();
        let utxo = funded(&[(a, 1000), (b, 2500)]);

        assert_eq!(wallet.balance(&utxo), 3500);
    }

    #[test]
    fn test_exact_spend_has_no_change() {
        let mut wallet = Wallet::new();
        let a = wallet.generate_key();
        let to = PrivateKey::generate().address();
        let utxo = funded(&[(a, 5000)]);

        let tx = wallet.create_transaction(&utxo, to, 5000).unwrap();
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].amount, 5000);
        assert!(utxo.validate_transaction(&tx, 0).is_ok());
    }

    #[test]
    fn test_change_returns_to_spending_key() {
        let mut wallet = Wallet::new();
        let a = wallet.generate_key();
        let to = PrivateKey::generate().address();
        let utxo = funded(&[(a, 5000)]);

        let tx = wallet.create_transaction(&utxo, to, 3000).unwrap();
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].address, a);
        assert_eq!(tx.outputs[1].amount, 2000);
        assert!(utxo.validate_transaction(&tx, 0).is_ok());
    }

    #[test]
    fn test_selection_gathers_multiple_outputs() {
        let mut wallet = Wallet::new();
        let a = wallet.generate_key();
        let to = PrivateKey::generate().address();
        let utxo = funded(&[(a, 1000), (a, 2000)]);

        let tx = wallet.create_transaction(&utxo, to, 2500).unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert!(utxo.validate_transaction(&tx, 0).is_ok());
    }

    #[test]
    fn test_insufficient_funds_reports_shortfall() {
        let mut wallet = Wallet::new();
        let a = wallet.generate_key();
        let to = PrivateKey::generate().address();
        let utxo = funded(&[(a, 1000)]);

        match wallet.create_transaction(&utxo, to, 5000) {
            Err(WalletError::InsufficientFunds { have, need }) => {
                assert_eq!(have, 1000);
                assert_eq!(need, 5000);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut wallet = Wallet::new();
        wallet.generate_key();
        wallet.generate_key();

        let path = std::env::temp_dir().join(format!(
            "tin-wallet-roundtrip-{}.json",
            std::process::id()
        ));
        wallet.save(&path).unwrap();
        let restored = Wallet::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(wallet.addresses(), restored.addresses());
    }
}
