//! Key management for HASHWEAVE
//!
//! Handles key generation and participant identity derivation.

use ed25519_dalek::{
    SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
    SECRET_KEY_LENGTH,
};
use hashweave_core::{HashweaveError, HashweaveResult, NodeId, PublicKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hashing::blake3_hash;

/// A keypair for signing and verification
#[derive(Clone)]
pub struct KeyPair {
    signing_key: Ed25519SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = Ed25519SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create keypair from seed bytes
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = Ed25519SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create keypair from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> HashweaveResult<Self> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(HashweaveError::InvalidPrivateKey);
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = self.signing_key.verifying_key();
        PublicKey::from_bytes(verifying_key.to_bytes())
    }

    /// Get the node ID (hash of the public key)
    pub fn node_id(&self) -> NodeId {
        node_id_from_public_key(&self.public_key())
    }

    /// Get the secret key bytes (BE CAREFUL with this!)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &Ed25519SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// Derive a participant's node ID from its public key using BLAKE3
pub fn node_id_from_public_key(public_key: &PublicKey) -> NodeId {
    let hash = blake3_hash(public_key.as_bytes());
    NodeId::from_bytes(*hash.as_bytes())
}

/// Convert our PublicKey type to Ed25519 verifying key
pub fn public_key_to_ed25519(key: &PublicKey) -> HashweaveResult<Ed25519VerifyingKey> {
    Ed25519VerifyingKey::from_bytes(key.as_bytes())
        .map_err(|_| HashweaveError::InvalidPublicKey)
}

/// Check that a public key decodes to a curve point
pub fn is_valid_public_key(key: &PublicKey) -> bool {
    public_key_to_ed25519(key).is_ok()
}

/// Secure secret key storage (zeroizes on drop)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_keypair(&self) -> KeyPair {
        KeyPair::from_seed(&self.bytes)
    }
}

/// Serializable key file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    pub public_key: String,
    pub node_id: String,
    pub secret_key: String,
}

impl From<&KeyPair> for KeyFile {
    fn from(keypair: &KeyPair) -> Self {
        Self {
            public_key: keypair.public_key().to_hex(),
            node_id: keypair.node_id().to_hex(),
            secret_key: hex::encode(keypair.secret_bytes()),
        }
    }
}

impl KeyFile {
    pub fn to_keypair(&self) -> HashweaveResult<KeyPair> {
        let bytes = hex::decode(&self.secret_key).map_err(|_| HashweaveError::InvalidPrivateKey)?;
        let keypair = KeyPair::from_secret_bytes(&bytes)?;
        if keypair.public_key().to_hex() != self.public_key {
            return Err(HashweaveError::InvalidPrivateKey);
        }
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_seed(&seed);
        let kp2 = KeyPair::from_seed(&seed);

        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.node_id(), kp2.node_id());
    }

    #[test]
    fn test_node_id_derivation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.node_id(), node_id_from_public_key(&kp.public_key()));
        assert!(is_valid_public_key(&kp.public_key()));
    }

    #[test]
    fn test_key_file_roundtrip() {
        let kp = KeyPair::from_seed(&[3u8; 32]);
        let file = KeyFile::from(&kp);
        let restored = file.to_keypair().unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn test_secret_key_zeroize() {
        let mut secret = SecretKey::new([42u8; 32]);
        let kp = secret.to_keypair();
        assert!(kp.public_key().as_bytes() != &[0u8; 32]);

        secret.zeroize();
        assert_eq!(secret.as_bytes(), &[0u8; 32]);
    }
}
