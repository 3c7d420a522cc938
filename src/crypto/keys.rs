//! Schnorr keys, signatures, and addresses.
//!
//! Uses the secp256k1 curve with Schnorr signatures for transaction
//! signing. An address is the 32-byte x-only public key itself, so a
//! transaction input can be verified against the owning address of the
//! output it spends without any extra key material.

use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature as K256Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::Hash;

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Address parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Missing {0} prefix")]
    InvalidPrefix(&'static str),
    #[error("Invalid base58 encoding")]
    InvalidEncoding,
    #[error("Invalid address length")]
    InvalidLength,
    #[error("Checksum mismatch")]
    InvalidChecksum,
}

/// 32-byte private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// 32-byte x-only Schnorr public key, doubling as a spendable address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(#[serde(with = "addr_serde")] pub [u8; 32]);

/// 64-byte Schnorr signature
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "sig_serde")] pub [u8; 64]);

mod addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("Invalid address length"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

mod sig_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("Invalid signature length"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        PrivateKey(signing_key)
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_bytes(bytes)
            .map(PrivateKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    /// The address controlled by this key (its x-only public key).
    pub fn address(&self) -> Address {
        let verifying_key = self.0.verifying_key();
        Address(verifying_key.to_bytes().into())
    }

    /// Sign a message hash
    pub fn sign(&self, message: &Hash) -> Result<Signature, SignatureError> {
        let signature: K256Signature = self.0.sign(&message.0);
        Ok(Signature(signature.to_bytes()))
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }
}

impl Address {
    /// Create from 32 bytes, validating that they form an x-only key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        VerifyingKey::from_bytes(bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Address(*bytes))
    }

    /// Verify a signature made by this address over a message hash.
    pub fn verify(&self, message: &Hash, signature: &Signature) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.0) {
            Ok(vk) => vk,
            Err(_) => return false,
        };

        let sig = match K256Signature::try_from(signature.0.as_slice()) {
            Ok(s) => s,
            Err(_) => return false,
        };

        verifying_key.verify(&message.0, &sig).is_ok()
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for Address {
    /// Printable form: "TN" + Base58(key bytes + 4-byte checksum)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let checksum = super::double_hash(&self.0);

        let mut with_checksum = Vec::with_capacity(36);
        with_checksum.extend_from_slice(&self.0);
        with_checksum.extend_from_slice(&checksum.0[0..4]);

        write!(
            f,
            "{}{}",
            crate::constants::CHAIN_NAME,
            bs58::encode(&with_checksum).into_string()
        )
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix = crate::constants::CHAIN_NAME;
        let encoded = s
            .strip_prefix(prefix)
            .ok_or(AddressError::InvalidPrefix(prefix))?;

        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| AddressError::InvalidEncoding)?;
        if decoded.len() != 36 {
            return Err(AddressError::InvalidLength);
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded[0..32]);

        let checksum = super::double_hash(&bytes);
        if decoded[32..36] != checksum.0[0..4] {
            return Err(AddressError::InvalidChecksum);
        }

        Ok(Address(bytes))
    }
}

impl Signature {
    /// Create from 64 bytes
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(*bytes)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}
