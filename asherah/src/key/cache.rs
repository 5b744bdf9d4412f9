use crate::error::{Error, Result};
use crate::key::{CryptoKey, KeyHandle};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Entry in the key cache
struct CacheEntry {
    /// The cached key; the cache is the owner, callers get shared handles
    key: Arc<CryptoKey>,

    /// When the entry was last verified against the metastore, in unix
    /// milliseconds
    cached_at: AtomicI64,
}

impl CacheEntry {
    fn new(key: CryptoKey) -> Self {
        Self {
            key: Arc::new(key),
            cached_at: AtomicI64::new(now_millis()),
        }
    }

    fn refresh(&self) {
        self.cached_at.store(now_millis(), Ordering::Release);
    }

    /// A revoked key is terminal and safe to serve without re-checking the
    /// metastore; anything else is only trusted within the revoke-check
    /// period.
    fn is_usable(&self, revoke_check_millis: i64) -> bool {
        self.key.is_revoked()
            || now_millis() - self.cached_at.load(Ordering::Acquire) < revoke_check_millis
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A cache of cryptographic keys for a single tier of the hierarchy, keyed by
/// the key's creation timestamp.
///
/// The engine uses one instance for system keys and one per partition for
/// intermediate keys. Cached entries are trusted for the policy's
/// revoke-check period, after which `get` reports a miss so the caller
/// re-verifies the key against the metastore.
pub struct KeyCache {
    name: &'static str,
    revoke_check_millis: i64,
    entries: RwLock<HashMap<i64, CacheEntry>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("name", &self.name)
            .field("revoke_check_millis", &self.revoke_check_millis)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl KeyCache {
    /// Creates a new KeyCache with the given name and revoke-check period
    pub fn new(name: &'static str, revoke_check_millis: i64) -> Self {
        Self {
            name,
            revoke_check_millis,
            entries: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::CacheClosed);
        }
        Ok(())
    }

    /// Returns the cached key created at the given timestamp, if it is still
    /// trusted
    pub fn get(&self, created: i64) -> Result<Option<KeyHandle>> {
        self.check_open()?;

        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&created).and_then(|entry| {
            if entry.is_usable(self.revoke_check_millis) {
                Some(KeyHandle::Shared(Arc::clone(&entry.key)))
            } else {
                log::debug!("{} cache stale -- created: {}", self.name, created);
                None
            }
        }))
    }

    /// Returns the cached key with the greatest creation timestamp, if it is
    /// still trusted
    pub fn get_last(&self) -> Result<Option<KeyHandle>> {
        self.check_open()?;

        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .max_by_key(|(created, _)| **created)
            .and_then(|(created, entry)| {
                if entry.is_usable(self.revoke_check_millis) {
                    Some(KeyHandle::Shared(Arc::clone(&entry.key)))
                } else {
                    log::debug!("{} cache stale -- created: {}", self.name, created);
                    None
                }
            }))
    }

    /// Inserts `key` if no entry exists for its creation timestamp and
    /// returns a usable handle.
    ///
    /// If an entry already exists, its verification time is refreshed (and
    /// revocation propagated if the fresh `key` is revoked) and the caller's
    /// own `key` is returned, so the call site never needs conditional drop
    /// logic.
    pub fn put_and_get_usable(&self, created: i64, key: CryptoKey) -> Result<KeyHandle> {
        self.check_open()?;

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.entry(created) {
            std::collections::hash_map::Entry::Occupied(existing) => {
                let entry = existing.get();
                entry.refresh();
                if key.is_revoked() {
                    entry.key.mark_revoked();
                }
                Ok(KeyHandle::Owning(key))
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let entry = vacant.insert(CacheEntry::new(key));
                Ok(KeyHandle::Shared(Arc::clone(&entry.key)))
            }
        }
    }

    /// Closes the cache and drops every owned key. One-shot; subsequent
    /// calls are no-ops and all other operations fail with `CacheClosed`.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        log::debug!("{} cache closing", self.name);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        Ok(())
    }
}
