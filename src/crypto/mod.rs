//! Cryptography module - BLAKE3 hashing, Schnorr keys, Merkle trees

mod hash;
mod keys;
mod merkle;

pub use hash::*;
pub use keys::*;
pub use merkle::*;
