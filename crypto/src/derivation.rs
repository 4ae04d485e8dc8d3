//! Key derivation using HKDF
//!
//! Simulations and test networks derive every participant's keypair from one
//! shared phrase so that separate processes agree on the participant set.

use hashweave_core::{HashweaveError, HashweaveResult};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::keys::{KeyPair, SecretKey};

/// Derive a key using HKDF-SHA256
pub fn derive_key(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_length: usize,
) -> HashweaveResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = vec![0u8; output_length];

    hk.expand(info, &mut output)
        .map_err(|e| HashweaveError::KeyDerivationFailed(e.to_string()))?;

    Ok(output)
}

/// Derive a 32-byte key
pub fn derive_key_32(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> HashweaveResult<[u8; 32]> {
    let key = derive_key(input_key_material, salt, info, 32)?;
    let mut result = [0u8; 32];
    result.copy_from_slice(&key);
    Ok(result)
}

/// Master seed for deriving participant keys
pub struct MasterKey {
    seed: SecretKey,
}

impl MasterKey {
    /// Create from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed: SecretKey::new(seed),
        }
    }

    /// Create from a shared phrase
    pub fn from_phrase(phrase: &str) -> HashweaveResult<Self> {
        let seed = derive_key_32(phrase.as_bytes(), Some(b"hashweave-seed"), b"master")?;
        Ok(Self::from_seed(seed))
    }

    /// Derive the keypair of participant `index`
    pub fn derive_keypair(&self, index: u32) -> HashweaveResult<KeyPair> {
        let info = format!("hashweave/participant/{}", index);
        let derived = derive_key_32(self.seed.as_bytes(), None, info.as_bytes())?;
        Ok(SecretKey::new(derived).to_keypair())
    }

    /// Derive keypairs for participants `0..count`
    pub fn derive_keypairs(&self, count: u32) -> HashweaveResult<Vec<KeyPair>> {
        (0..count).map(|index| self.derive_keypair(index)).collect()
    }
}
