//! Cryptographic primitives for the asherah library
//!
//! The only cipher the library ships is AES-256-GCM. Output is laid out as
//! `ciphertext ‖ tag ‖ nonce` with the 96-bit nonce trailing, matching the
//! envelope format used by every other Asherah implementation.

mod aes256gcm;

pub use aes256gcm::Aes256GcmAead;

use crate::util;
use crate::AES256_KEY_SIZE;

/// Nonce size used by GCM mode, in bytes
pub(crate) const GCM_NONCE_SIZE: usize = 12;

/// Authentication tag size used by GCM mode, in bytes
pub(crate) const GCM_TAG_SIZE: usize = 16;

// Maximum message size supported by GCM: ((1 << 32) - 2) * block size
pub(crate) const GCM_MAX_DATA_SIZE: usize = ((1 << 32) - 2) * 16;

/// Generates a fresh random 256-bit key
pub fn random_key() -> Vec<u8> {
    util::get_rand_bytes(AES256_KEY_SIZE)
}
