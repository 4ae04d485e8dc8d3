//! HASHWEAVE Cryptography Module
//!
//! Provides cryptographic primitives using standard, audited algorithms:
//! - Ed25519 for event signatures
//! - BLAKE3 for event hashing
//! - HKDF for deterministic participant key derivation

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod derivation;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
