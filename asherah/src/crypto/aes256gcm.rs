use crate::crypto::{GCM_MAX_DATA_SIZE, GCM_NONCE_SIZE, GCM_TAG_SIZE};
use crate::error::{Error, Result};
use crate::util;
use crate::{Aead, AES256_KEY_SIZE};
use aes_gcm::aead::{Aead as AeadCipher, KeyInit};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce};

/// AES-256-GCM implementation of [`Aead`]
///
/// Every call generates a fresh random 96-bit nonce, which is appended to the
/// ciphertext so the output is `ciphertext ‖ tag ‖ nonce`.
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmAead;

impl Aes256GcmAead {
    /// Creates a new instance of the AES-256-GCM AEAD implementation
    pub fn new() -> Self {
        Self
    }

    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        if key.len() != AES256_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "invalid key size {}, expected {}",
                key.len(),
                AES256_KEY_SIZE
            )));
        }
        Ok(Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key)))
    }
}

impl Aead for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::Crypto("data too large for GCM".to_string()));
        }

        let cipher = Self::cipher(key)?;

        let mut nonce_bytes = [0_u8; GCM_NONCE_SIZE];
        util::fill_random(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut output = cipher
            .encrypt(nonce, data)
            .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;
        output.extend_from_slice(&nonce_bytes);

        Ok(output)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
            return Err(Error::Crypto(
                "data length is too short for GCM (tag + nonce)".to_string(),
            ));
        }

        let cipher = Self::cipher(key)?;

        let (ciphertext, nonce_bytes) = data.split_at(data.len() - GCM_NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Crypto(format!("decryption failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_key;

    #[test]
    fn round_trip() {
        let aead = Aes256GcmAead::new();
        let key = random_key();
        let plaintext = b"mysupersecretpayload";

        let encrypted = aead.encrypt(plaintext, &key).expect("encrypt");
        assert_eq!(
            encrypted.len(),
            plaintext.len() + GCM_TAG_SIZE + GCM_NONCE_SIZE
        );

        let decrypted = aead.decrypt(&encrypted, &key).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let aead = Aes256GcmAead::new();
        let key = random_key();

        let encrypted = aead.encrypt(b"", &key).expect("encrypt");
        assert_eq!(encrypted.len(), GCM_TAG_SIZE + GCM_NONCE_SIZE);
        assert_eq!(aead.decrypt(&encrypted, &key).expect("decrypt"), b"");
    }

    #[test]
    fn nonce_is_trailing_and_unique() {
        let aead = Aes256GcmAead::new();
        let key = random_key();

        let a = aead.encrypt(b"payload", &key).expect("encrypt");
        let b = aead.encrypt(b"payload", &key).expect("encrypt");

        let nonce_a = &a[a.len() - GCM_NONCE_SIZE..];
        let nonce_b = &b[b.len() - GCM_NONCE_SIZE..];
        assert_ne!(nonce_a, nonce_b);
        assert_ne!(a, b);
    }

    #[test]
    fn tamper_detection() {
        let aead = Aes256GcmAead::new();
        let key = random_key();
        let mut encrypted = aead.encrypt(b"payload", &key).expect("encrypt");

        // Flip a ciphertext byte.
        encrypted[0] ^= 0x01;
        assert!(matches!(
            aead.decrypt(&encrypted, &key),
            Err(Error::Crypto(_))
        ));

        // Flip a nonce byte instead.
        encrypted[0] ^= 0x01;
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(
            aead.decrypt(&encrypted, &key),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn known_answer_vector_decrypts() {
        // NIST AES-256-GCM vector: all-zero key, all-zero 96-bit nonce,
        // 16 zero bytes of plaintext. Exercises the trailing-nonce layout
        // against an externally computed ciphertext and tag.
        let aead = Aes256GcmAead::new();
        let key = [0_u8; 32];

        let mut data = hex::decode(
            "cea7403d4d606b6e074ec5d3baf39d18d0d1c8a799996bf0265b98b5d48ab919",
        )
        .expect("hex");
        data.extend_from_slice(&[0_u8; GCM_NONCE_SIZE]);

        let plaintext = aead.decrypt(&data, &key).expect("decrypt");
        assert_eq!(plaintext, vec![0_u8; 16]);
    }

    #[test]
    fn wrong_key_fails() {
        let aead = Aes256GcmAead::new();
        let encrypted = aead.encrypt(b"payload", &random_key()).expect("encrypt");
        assert!(matches!(
            aead.decrypt(&encrypted, &random_key()),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn length_underflow_is_rejected() {
        let aead = Aes256GcmAead::new();
        let key = random_key();
        assert!(matches!(
            aead.decrypt(&[0_u8; GCM_NONCE_SIZE], &key),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn invalid_key_size_is_rejected() {
        let aead = Aes256GcmAead::new();
        assert!(matches!(
            aead.encrypt(b"payload", &[0_u8; 16]),
            Err(Error::Crypto(_))
        ));
    }
}
