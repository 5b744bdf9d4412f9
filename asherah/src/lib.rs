//! # Asherah
//!
//! An application-level envelope encryption library.
//!
//! `asherah` manages a hierarchy of keys (System Keys, Intermediate Keys,
//! Data Row Keys), implements the rotation and expiration rules of a
//! [`CryptoPolicy`], caches keys in locked memory, and persists encrypted
//! keys through a [`Metastore`]. Encrypting a payload produces a
//! self-describing [`DataRowRecord`] that any process sharing the same
//! metastore and KMS can decrypt.
//!
//! Key rotation is inline: new keys are generated on demand when an
//! encryption operation finds the current key expired or missing. The
//! `queued` strategy is accepted as configuration for hosts that rotate out
//! of band, but the engine itself always rotates inline.
//!
//! ## Basic usage
//!
//! ```rust
//! use asherah::kms::StaticKeyManagementService;
//! use asherah::metastore::InMemoryMetastore;
//! use asherah::policy::CryptoPolicy;
//! use asherah::session::SessionFactory;
//! use std::sync::Arc;
//!
//! # fn main() -> asherah::Result<()> {
//! let factory = SessionFactory::new(
//!     "product",
//!     "service",
//!     Arc::new(InMemoryMetastore::new()),
//!     Arc::new(StaticKeyManagementService::new(
//!         b"thisIsAStaticMasterKeyForTesting".to_vec(),
//!     )?),
//!     CryptoPolicy::new(),
//! );
//!
//! let session = factory.get_session("user123")?;
//!
//! let encrypted = session.encrypt(b"secret data")?;
//! let decrypted = session.decrypt(&encrypted)?;
//! assert_eq!(decrypted, b"secret data");
//!
//! session.close()?;
//! factory.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod key;
pub mod kms;
pub mod log;
pub mod metastore;
pub mod metrics;
pub mod partition;
pub mod persistence;
pub mod policy;
pub mod session;
mod session_cache;
pub mod util;

pub use crate::config::Options;
pub use crate::envelope::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
pub use crate::error::{Error, Result};
pub use crate::partition::{DefaultPartition, Partition};
pub use crate::persistence::{Loader, Storer};
pub use crate::policy::CryptoPolicy;
pub use crate::session::{Session, SessionFactory};

use std::fmt;
use std::sync::Arc;

/// Size of an AES-256 key in bytes
pub const AES256_KEY_SIZE: usize = 32;

/// Key Management Service interface for wrapping and unwrapping system keys
///
/// The envelope format produced by `encrypt_key` is implementation-defined;
/// the engine treats it as opaque bytes.
pub trait KeyManagementService: Send + Sync + fmt::Debug {
    /// Encrypts key material under the master key
    fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts key material previously encrypted with `encrypt_key`
    fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>>;
}

/// Metastore interface for persisting encrypted keys
///
/// Implementations must provide strongly consistent point reads and an
/// at-most-once insert: `store` succeeds only for the first writer of a
/// given `(id, created)` pair, and every later `load` of that pair observes
/// the winner's record.
pub trait Metastore: Send + Sync + fmt::Debug {
    /// Loads the record with the given id and creation timestamp
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>>;

    /// Loads the record with the greatest creation timestamp for the id
    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>>;

    /// Stores a record iff no record with `(id, created)` exists
    ///
    /// Returns true if the record was stored, false if the uniqueness
    /// constraint fired, and an error for any other failure.
    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool>;
}

impl<M: Metastore + ?Sized> Metastore for Arc<M> {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        (**self).load(id, created)
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        (**self).load_latest(id)
    }

    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
        (**self).store(id, created, record)
    }
}

/// AEAD (Authenticated Encryption with Associated Data) interface
///
/// Implementations append whatever bookkeeping they need (nonce, tag) to the
/// ciphertext; `decrypt(encrypt(data, key), key) == data`.
pub trait Aead: Send + Sync + fmt::Debug {
    /// Encrypts data using the provided key
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts data using the provided key
    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;
}
