use crate::crypto::Aes256GcmAead;
use crate::error::{Error, Result};
use crate::{Aead, KeyManagementService, AES256_KEY_SIZE};
use securemem::Secret;

/// A key management service backed by a static in-process master key
///
/// Wraps and unwraps key material with AES-256-GCM under a caller-supplied
/// 32-byte master key, which is held in locked memory. Useful for testing and
/// development; production deployments should use a real KMS.
pub struct StaticKeyManagementService {
    master_key: Secret,
    aead: Aes256GcmAead,
}

impl std::fmt::Debug for StaticKeyManagementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyManagementService")
            .field("master_key", &"<locked>")
            .finish()
    }
}

impl StaticKeyManagementService {
    /// Creates a new StaticKeyManagementService with the given master key.
    /// The source buffer is wiped.
    pub fn new(mut master_key: Vec<u8>) -> Result<Self> {
        if master_key.len() != AES256_KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "static master key must be {AES256_KEY_SIZE} bytes, got {}",
                master_key.len()
            )));
        }

        Ok(Self {
            master_key: Secret::from_slice(&mut master_key)?,
            aead: Aes256GcmAead::new(),
        })
    }
}

impl KeyManagementService for StaticKeyManagementService {
    fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.master_key
            .with_bytes(|master| self.aead.encrypt(key, master))
            .map_err(|e| Error::Kms(e.to_string()))?
            .map_err(|e| Error::Kms(e.to_string()))
    }

    fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        self.master_key
            .with_bytes(|master| self.aead.decrypt(encrypted_key, master))
            .map_err(|e| Error::Kms(e.to_string()))?
            .map_err(|e| Error::Kms(e.to_string()))
    }
}
