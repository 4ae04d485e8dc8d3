//! Core traits defining HASHWEAVE interfaces

use crate::types::*;

/// Result type for HASHWEAVE operations
pub type HashweaveResult<T> = Result<T, crate::error::HashweaveError>;

/// Trait for hashable types
pub trait Hashable {
    /// Compute the hash of this object
    fn hash(&self) -> Hash;
}

/// Trait for signable types
pub trait Signable: Hashable {
    /// Get the bytes to be signed
    fn signing_bytes(&self) -> Vec<u8>;
}

/// Trait for verifiable signatures
pub trait Verifiable: Signable {
    /// Get the signer's public key
    fn signer(&self) -> &PublicKey;

    /// Get the signature
    fn signature(&self) -> &Signature;
}
