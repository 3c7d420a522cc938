//! UTXO set: the unspent outputs of the selected chain.
//!
//! Derived state only. It is rebuilt from scratch by replaying the
//! chain, so there is no undo path; fork resolution swaps in a freshly
//! replayed set.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Address, Hash};
use crate::ledger::Transaction;

/// Key for UTXO lookup: (transaction id, output index)
pub type OutputRef = (Hash, u32);

/// Transaction validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("Referenced output {id}:{index} is unknown or already spent")]
    UnknownOutput { id: Hash, index: u32 },
    #[error("Signature does not verify against the owning address")]
    BadSignature,
    #[error("Input value {inputs} does not balance output value {outputs}")]
    Unbalanced { inputs: u64, outputs: u64 },
    #[error("Duplicate reference to output {id}:{index}")]
    DuplicateInput { id: Hash, index: u32 },
    #[error("Output amounts must be positive")]
    NonPositiveOutput,
    #[error("Transaction id does not match its content")]
    IdMismatch,
}

/// An unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    /// Owning address
    pub address: Address,
    /// Amount in base units
    pub amount: u64,
}

/// Set of all unspent transaction outputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtxoSet {
    entries: HashMap<OutputRef, UtxoEntry>,
}

impl UtxoSet {
    /// Create a new empty UTXO set
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Check if an output exists
    pub fn contains(&self, id: &Hash, index: u32) -> bool {
        self.entries.contains_key(&(*id, index))
    }

    /// Get an output if it exists
    pub fn get(&self, id: &Hash, index: u32) -> Option<&UtxoEntry> {
        self.entries.get(&(*id, index))
    }

    /// Validate a transaction against this set.
    ///
    /// `max_reward` caps the amount a reward transaction may claim at
    /// the height it is being validated for.
    pub fn validate_transaction(&self, tx: &Transaction, max_reward: u64) -> Result<(), TxError> {
        if tx.id != tx.compute_id() {
            return Err(TxError::IdMismatch);
        }

        if tx.is_reward() {
            if !tx.inputs.is_empty() || tx.outputs.len() != 1 {
                return Err(TxError::Unbalanced {
                    inputs: 0,
                    outputs: tx.total_output_value(),
                });
            }
            let amount = tx.outputs[0].amount;
            if amount == 0 {
                return Err(TxError::NonPositiveOutput);
            }
            if amount > max_reward {
                return Err(TxError::Unbalanced {
                    inputs: max_reward,
                    outputs: amount,
                });
            }
            return Ok(());
        }

        if tx.outputs.is_empty() || tx.outputs.iter().any(|o| o.amount == 0) {
            return Err(TxError::NonPositiveOutput);
        }
        if tx.inputs.is_empty() {
            return Err(TxError::Unbalanced {
                inputs: 0,
                outputs: tx.total_output_value(),
            });
        }

        let mut seen: HashSet<OutputRef> = HashSet::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if !seen.insert((input.output_id, input.output_index)) {
                return Err(TxError::DuplicateInput {
                    id: input.output_id,
                    index: input.output_index,
                });
            }
        }

        let signing_hash = tx.signing_hash();
        let mut input_total: u64 = 0;
        for input in &tx.inputs {
            let entry =
                self.get(&input.output_id, input.output_index)
                    .ok_or(TxError::UnknownOutput {
                        id: input.output_id,
                        index: input.output_index,
                    })?;

            // The claimed owner must be the recorded owner, and the
            // signature must verify against it.
            if entry.address != input.owner {
                return Err(TxError::BadSignature);
            }
            if !input.owner.verify(&signing_hash, &input.signature) {
                return Err(TxError::BadSignature);
            }

            input_total = input_total
                .checked_add(entry.amount)
                .ok_or(TxError::Unbalanced {
                    inputs: u64::MAX,
                    outputs: tx.total_output_value(),
                })?;
        }

        let mut output_total: u64 = 0;
        for output in &tx.outputs {
            output_total = output_total
                .checked_add(output.amount)
                .ok_or(TxError::Unbalanced {
                    inputs: input_total,
                    outputs: u64::MAX,
                })?;
        }

        if input_total != output_total {
            return Err(TxError::Unbalanced {
                inputs: input_total,
                outputs: output_total,
            });
        }

        Ok(())
    }

    /// Apply a validated transaction: consume its inputs, create its
    /// outputs keyed by (id, index).
    pub fn apply_transaction(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            self.entries.remove(&(input.output_id, input.output_index));
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            self.entries.insert(
                (tx.id, index as u32),
                UtxoEntry {
                    address: output.address,
                    amount: output.amount,
                },
            );
        }
    }

    /// Sum of outputs owned by an address
    pub fn balance_of(&self, address: &Address) -> u64 {
        self.entries
            .values()
            .filter(|entry| entry.address == *address)
            .map(|entry| entry.amount)
            .sum()
    }

    /// All outputs owned by an address, for coin selection
    pub fn entries_for(&self, address: &Address) -> Vec<(OutputRef, &UtxoEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.address == *address)
            .map(|(key, entry)| (*key, entry))
            .collect()
    }

    /// Sum of all unspent amounts
    pub fn total_value(&self) -> u64 {
        self.entries.values().map(|entry| entry.amount).sum()
    }

    /// Get total number of unspent outputs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::ledger::{TxInput, TxOutput};

    const CAP: u64 = 5000;

    /// Reward `amount` to `key`'s address and return the spendable ref.
    fn fund(set: &mut UtxoSet, key: &PrivateKey, amount: u64, index: u64) -> OutputRef {
        let tx = Transaction::reward(key.address(), amount, index);
        set.apply_transaction(&tx);
        (tx.id, 0)
    }

    /// Build a signed transfer spending one output.
    fn transfer(key: &PrivateKey, from: OutputRef, outputs: Vec<TxOutput>) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput {
                output_id: from.0,
                output_index: from.1,
                owner: key.address(),
                signature: crate::crypto::Signature([0u8; 64]),
            }],
            outputs,
        );
        let sig = key.sign(&tx.signing_hash()).unwrap();
        tx.inputs[0].signature = sig;
        tx.id = tx.compute_id();
        tx
    }

    #[test]
    fn test_apply_reward_creates_output() {
        let mut set = UtxoSet::new();
        let key = PrivateKey::generate();
        let (id, _) = fund(&mut set, &key, 5000, 1);

        assert!(set.contains(&id, 0));
        assert_eq!(set.balance_of(&key.address()), 5000);
        assert_eq!(set.total_value(), 5000);
    }

    #[test]
    fn test_valid_transfer() {
        let mut set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();
        let from = fund(&mut set, &alice, 5000, 1);

        let tx = transfer(
            &alice,
            from,
            vec![
                TxOutput {
                    address: bob.address(),
                    amount: 2000,
                },
                TxOutput {
                    address: alice.address(),
                    amount: 3000,
                },
            ],
        );

        assert_eq!(set.validate_transaction(&tx, CAP), Ok(()));
        set.apply_transaction(&tx);

        assert_eq!(set.balance_of(&alice.address()), 3000);
        assert_eq!(set.balance_of(&bob.address()), 2000);
        assert!(!set.contains(&from.0, from.1));
    }

    #[test]
    fn test_unknown_output_rejected() {
        let set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let phantom = (crate::crypto::hash_bytes(b"phantom"), 0);

        let tx = transfer(
            &alice,
            phantom,
            vec![TxOutput {
                address: alice.address(),
                amount: 100,
            }],
        );

        assert!(matches!(
            set.validate_transaction(&tx, CAP),
            Err(TxError::UnknownOutput { .. })
        ));
    }

    #[test]
    fn test_unbalanced_rejected() {
        let mut set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let from = fund(&mut set, &alice, 5000, 1);

        let tx = transfer(
            &alice,
            from,
            vec![TxOutput {
                address: alice.address(),
                amount: 4999,
            }],
        );

        assert_eq!(
            set.validate_transaction(&tx, CAP),
            Err(TxError::Unbalanced {
                inputs: 5000,
                outputs: 4999
            })
        );
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let mut set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let mallory = PrivateKey::generate();
        let from = fund(&mut set, &alice, 5000, 1);

        // Mallory signs and claims to own Alice's output
        let tx = transfer(
            &mallory,
            from,
            vec![TxOutput {
                address: mallory.address(),
                amount: 5000,
            }],
        );

        assert_eq!(set.validate_transaction(&tx, CAP), Err(TxError::BadSignature));
    }

    #[test]
    fn test_tampered_output_rejected() {
        let mut set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let mallory = PrivateKey::generate();
        let from = fund(&mut set, &alice, 5000, 1);

        let mut tx = transfer(
            &alice,
            from,
            vec![TxOutput {
                address: alice.address(),
                amount: 5000,
            }],
        );

        // Redirect the output after signing
        tx.outputs[0].address = mallory.address();

        // Either the id no longer matches, or once recomputed the
        // signature no longer verifies.
        assert!(set.validate_transaction(&tx, CAP).is_err());
        tx.id = tx.compute_id();
        assert_eq!(set.validate_transaction(&tx, CAP), Err(TxError::BadSignature));
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let mut set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let from = fund(&mut set, &alice, 5000, 1);

        let mut tx = Transaction::new(
            vec![
                TxInput {
                    output_id: from.0,
                    output_index: from.1,
                    owner: alice.address(),
                    signature: crate::crypto::Signature([0u8; 64]),
                },
                TxInput {
                    output_id: from.0,
                    output_index: from.1,
                    owner: alice.address(),
                    signature: crate::crypto::Signature([0u8; 64]),
                },
            ],
            vec![TxOutput {
                address: alice.address(),
                amount: 10000,
            }],
        );
        let sig = alice.sign(&tx.signing_hash()).unwrap();
        tx.inputs[0].signature = sig.clone();
        tx.inputs[1].signature = sig;
        tx.id = tx.compute_id();

        assert!(matches!(
            set.validate_transaction(&tx, CAP),
            Err(TxError::DuplicateInput { .. })
        ));
    }

    #[test]
    fn test_zero_output_rejected() {
        let mut set = UtxoSet::new();
        let alice = PrivateKey::generate();
        let from = fund(&mut set, &alice, 5000, 1);

        let tx = transfer(
            &alice,
            from,
            vec![
                TxOutput {
                    address: alice.address(),
                    amount: 5000,
                },
                TxOutput {
                    address: alice.address(),
                    amount: 0,
                },
            ],
        );

        assert_eq!(
            set.validate_transaction(&tx, CAP),
            Err(TxError::NonPositiveOutput)
        );
    }

    #[test]
    fn test_reward_over_cap_rejected() {
        let set = UtxoSet::new();
        let miner = PrivateKey::generate();
        let tx = Transaction::reward(miner.address(), CAP + 1, 1);

        assert_eq!(
            set.validate_transaction(&tx, CAP),
            Err(TxError::Unbalanced {
                inputs: CAP,
                outputs: CAP + 1
            })
        );
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let set = UtxoSet::new();
        let miner = PrivateKey::generate();
        let mut tx = Transaction::reward(miner.address(), 5000, 1);
        tx.outputs[0].amount = 4000;

        assert_eq!(set.validate_transaction(&tx, CAP), Err(TxError::IdMismatch));
    }
}
