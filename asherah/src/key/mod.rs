//! Key management for the asherah library

pub mod cache;

use crate::error::{Error, Result};
use securemem::Secret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cryptographic key held in secure memory
///
/// The key is immutable apart from its revoked flag, which can only move from
/// `false` to `true`. Dropping a `CryptoKey` wipes the underlying secret.
pub struct CryptoKey {
    /// Unix timestamp (seconds) when the key was created
    created: i64,

    /// Flag indicating if the key has been revoked
    revoked: AtomicBool,

    /// Secret containing the actual key bytes
    secret: Secret,
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoKey")
            .field("created", &self.created)
            .field("revoked", &self.is_revoked())
            .field("secret", &"<locked>")
            .finish()
    }
}

impl CryptoKey {
    /// Creates a CryptoKey from an existing secret
    pub fn new(created: i64, revoked: bool, secret: Secret) -> Self {
        Self {
            created,
            revoked: AtomicBool::new(revoked),
            secret,
        }
    }

    /// Creates a CryptoKey by moving `bytes` into secure memory; the source
    /// buffer is wiped
    pub fn from_bytes(created: i64, revoked: bool, bytes: &mut [u8]) -> Result<Self> {
        let secret = Secret::from_slice(bytes)?;
        Ok(Self::new(created, revoked, secret))
    }

    /// Generates a new random key of the specified size
    pub fn generate(created: i64, size: usize) -> Result<Self> {
        let secret = Secret::random(size)?;
        Ok(Self::new(created, false, secret))
    }

    /// Returns the timestamp when the key was created
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Checks if the key has been revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Marks the key as revoked. Idempotent; revocation never clears.
    pub fn mark_revoked(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    /// Provides scoped access to the plaintext key bytes
    pub fn with_key<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        self.secret.with_bytes(action).map_err(Error::SecureMemory)?
    }
}

/// A usable handle to a CryptoKey
///
/// The owning variant wipes the key when dropped; the shared variant is a
/// reference into a cache-owned key, so dropping it is a no-op and revocation
/// writes through to the cached key. Call sites can always drop the handle
/// unconditionally.
#[derive(Debug)]
pub enum KeyHandle {
    /// The handle owns the key outright
    Owning(CryptoKey),

    /// The key is owned elsewhere (by a cache)
    Shared(Arc<CryptoKey>),
}

impl KeyHandle {
    /// Returns the timestamp when the key was created
    pub fn created(&self) -> i64 {
        self.key().created()
    }

    /// Checks if the key has been revoked
    pub fn is_revoked(&self) -> bool {
        self.key().is_revoked()
    }

    /// Marks the key as revoked; on a shared handle the flag is visible to
    /// every other holder of the same key
    pub fn mark_revoked(&self) {
        self.key().mark_revoked();
    }

    /// Provides scoped access to the plaintext key bytes
    pub fn with_key<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        self.key().with_key(action)
    }

    fn key(&self) -> &CryptoKey {
        match self {
            KeyHandle::Owning(key) => key,
            KeyHandle::Shared(key) => key,
        }
    }
}
