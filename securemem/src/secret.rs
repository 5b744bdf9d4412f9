use crate::error::{Result, SecretError};
use crate::mmap::{self, Protection};
use log::warn;
use std::sync::{Mutex, PoisonError};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Key material held in page-aligned, mlocked memory.
///
/// The backing pages are `PROT_NONE` at rest and become readable only inside
/// [`Secret::with_bytes`]. Dropping a `Secret` wipes the bytes before the
/// pages are unlocked and unmapped.
///
/// A `Secret` is deliberately not `Clone`; duplicating key material is an
/// explicit [`Secret::copy`], which allocates a new locked region.
pub struct Secret {
    ptr: *mut u8,
    len: usize,
    capacity: usize,
    // Number of in-flight `with_bytes` readers. Access is reentrant-safe for
    // reads; the pages stay readable until the last reader leaves.
    readers: Mutex<usize>,
}

// The raw pointer is owned exclusively by this Secret and all access is
// serialized through the readers mutex.
unsafe impl Send for Secret {}
unsafe impl Sync for Secret {}

impl Secret {
    /// Creates a secret by copying `data` into locked memory, then wipes
    /// `data` in place.
    pub fn from_slice(data: &mut [u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(SecretError::InvalidSize(
                "cannot create a zero-length secret".to_string(),
            ));
        }

        let secret = Self::alloc(data.len(), |dest| {
            dest.copy_from_slice(data);
            Ok(())
        })?;
        data.zeroize();
        Ok(secret)
    }

    /// Creates a secret of `len` cryptographically random bytes, generated
    /// directly inside the locked region.
    pub fn random(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(SecretError::InvalidSize(
                "cannot create a zero-length secret".to_string(),
            ));
        }

        Self::alloc(len, |dest| {
            getrandom::getrandom(dest)
                .map_err(|e| SecretError::OsError(format!("getrandom: {e}")))
        })
    }

    // Allocates a locked region of `len` bytes, lets `init` fill it while it
    // is still writable, then drops the pages to NoAccess.
    fn alloc<F>(len: usize, init: F) -> Result<Self>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        let capacity = mmap::aligned_size(len);
        let ptr = mmap::alloc(capacity)?;

        let teardown = |ptr: *mut u8, capacity: usize| unsafe {
            let slice = std::slice::from_raw_parts_mut(ptr, capacity);
            slice.zeroize();
            if let Err(e) = mmap::free(ptr, capacity) {
                warn!("failed to release secure memory: {e}");
            }
        };

        unsafe {
            if let Err(e) = mmap::lock(ptr, capacity) {
                teardown(ptr, capacity);
                return Err(e);
            }

            let dest = std::slice::from_raw_parts_mut(ptr, len);
            if let Err(e) = init(dest) {
                if let Err(unlock_err) = mmap::unlock(ptr, capacity) {
                    warn!("failed to unlock secure memory: {unlock_err}");
                }
                teardown(ptr, capacity);
                return Err(e);
            }

            if let Err(e) = mmap::protect(ptr, capacity, Protection::NoAccess) {
                if let Err(unlock_err) = mmap::unlock(ptr, capacity) {
                    warn!("failed to unlock secure memory: {unlock_err}");
                }
                teardown(ptr, capacity);
                return Err(e);
            }
        }

        Ok(Self {
            ptr,
            len,
            capacity,
            readers: Mutex::new(0),
        })
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the secret holds no bytes. Construction rejects empty
    /// secrets, so this is always false for a live value.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exposes the plaintext bytes to `action` for the duration of the call.
    ///
    /// The pages are readable only while at least one reader is inside this
    /// method; the last reader out returns them to `PROT_NONE`.
    pub fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        {
            let mut readers = self
                .readers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *readers == 0 {
                unsafe { mmap::protect(self.ptr, self.capacity, Protection::ReadOnly)? };
            }
            *readers += 1;
        }

        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        let result = action(bytes);

        {
            let mut readers = self
                .readers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *readers -= 1;
            if *readers == 0 {
                unsafe { mmap::protect(self.ptr, self.capacity, Protection::NoAccess)? };
            }
        }

        Ok(result)
    }

    /// Duplicates the secret into a freshly allocated locked region.
    pub fn copy(&self) -> Result<Secret> {
        self.with_bytes(|bytes| {
            Self::alloc(bytes.len(), |dest| {
                dest.copy_from_slice(bytes);
                Ok(())
            })
        })?
    }

    /// Compares the secret against `other` in constant time.
    pub fn constant_time_eq(&self, other: &[u8]) -> Result<bool> {
        self.with_bytes(|bytes| {
            if bytes.len() != other.len() {
                return false;
            }
            bool::from(bytes.ct_eq(other))
        })
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = mmap::protect(self.ptr, self.capacity, Protection::ReadWrite) {
                warn!("failed to unprotect secure memory for wipe: {e}");
                return;
            }

            let slice = std::slice::from_raw_parts_mut(self.ptr, self.capacity);
            slice.zeroize();

            if let Err(e) = mmap::unlock(self.ptr, self.capacity) {
                warn!("failed to unlock secure memory: {e}");
            }
            if let Err(e) = mmap::free(self.ptr, self.capacity) {
                warn!("failed to free secure memory: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.len)
            .field("bytes", &"<locked>")
            .finish()
    }
}
