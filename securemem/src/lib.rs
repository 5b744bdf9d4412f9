//! # securemem
//!
//! Locked-memory storage for cryptographic key material.
//!
//! A [`Secret`] owns a page-aligned region that is pinned into RAM (`mlock`)
//! so it can never be swapped to disk, kept `PROT_NONE` while idle, and wiped
//! before the pages are returned to the OS. Plaintext is only reachable
//! through the scoped [`Secret::with_bytes`] accessor.
//!
//! ```rust
//! use securemem::Secret;
//!
//! # fn main() -> securemem::Result<()> {
//! let mut key = vec![0x42_u8; 32];
//! let secret = Secret::from_slice(&mut key)?;
//!
//! // The source buffer was wiped by construction.
//! assert!(key.iter().all(|b| *b == 0));
//!
//! let first = secret.with_bytes(|bytes| bytes[0])?;
//! assert_eq!(first, 0x42);
//! # Ok(())
//! # }
//! ```

#![cfg(unix)]

mod error;
mod mmap;
mod secret;

pub use error::{Result, SecretError};
pub use mmap::disable_core_dumps;
pub use secret::Secret;
