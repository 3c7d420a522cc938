//! Transaction structure.
//!
//! UTXO-based transactions with Schnorr signatures. A transaction's id
//! is the BLAKE3 hash of its canonical payload, which excludes
//! signatures, so the id doubles as the signing hash for every input.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, Address, Hash, Signature};

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Value transfer spending existing outputs
    Regular,
    /// Mining reward, only valid as the first transaction of a block
    Reward,
}

/// A transaction input referencing an unspent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction containing the output
    pub output_id: Hash,
    /// Index of the output in that transaction
    pub output_index: u32,
    /// Address that owns the referenced output
    pub owner: Address,
    /// Signature by the owner over the transaction's signing hash
    pub signature: Signature,
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Recipient address
    pub address: Address,
    /// Amount in base units
    pub amount: u64,
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash of the canonical payload
    pub id: Hash,
    /// Transaction kind
    pub kind: TxKind,
    /// Payload disambiguator. Reward transactions carry their block
    /// index here so equal rewards at different heights get distinct
    /// ids; regular transactions leave it 0.
    pub nonce: u64,
    /// Transaction inputs (empty for rewards)
    pub inputs: Vec<TxInput>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a regular transaction from signed inputs and outputs.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash::zero(),
            kind: TxKind::Regular,
            nonce: 0,
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Create a mining reward transaction for the block at `index`.
    pub fn reward(to: Address, amount: u64, index: u64) -> Self {
        let mut tx = Self {
            id: Hash::zero(),
            kind: TxKind::Reward,
            nonce: index,
            inputs: vec![],
            outputs: vec![TxOutput {
                address: to,
                amount,
            }],
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Check if this is a reward transaction
    pub fn is_reward(&self) -> bool {
        self.kind == TxKind::Reward
    }

    /// Recompute the content-hash id from the canonical payload.
    pub fn compute_id(&self) -> Hash {
        hash_bytes(&self.canonical_payload())
    }

    /// The hash every input signature commits to. Identical to the id
    /// preimage: signatures are excluded from the payload.
    pub fn signing_hash(&self) -> Hash {
        self.compute_id()
    }

    /// Hash over payload plus signatures, used as the merkle leaf so
    /// blocks commit to signatures as well.
    pub fn wire_hash(&self) -> Hash {
        let mut bytes = self.canonical_payload();
        for input in &self.inputs {
            bytes.extend_from_slice(&input.signature.0);
        }
        hash_bytes(&bytes)
    }

    /// Canonical little-endian payload (signatures and id excluded).
    fn canonical_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        bytes.push(match self.kind {
            TxKind::Regular => 0u8,
            TxKind::Reward => 1u8,
        });
        bytes.extend_from_slice(&self.nonce.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.output_id.0);
            bytes.extend_from_slice(&input.output_index.to_le_bytes());
            bytes.extend_from_slice(&input.owner.0);
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.address.0);
            bytes.extend_from_slice(&output.amount.to_le_bytes());
        }

        bytes
    }

    /// Sum of all output amounts
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}
