//! Session caching for the session factory
//!
//! Cached sessions share the factory's key caches, so reusing them avoids
//! both session construction and the first metastore round trips. Entries
//! are evicted by LRU order and a wall-clock TTL; a session's real teardown
//! is deferred until eviction, and skipped while callers still hold handles.

use crate::error::Result;
use crate::metrics;
use crate::session::Session;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct CachedSession {
    session: Session,
    cached_at: Instant,
}

pub(crate) struct SessionCache {
    entries: Mutex<LruCache<String, CachedSession>>,
    ttl: Duration,
}

impl SessionCache {
    pub(crate) fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns the cached session for `id` if present and not expired.
    pub(crate) fn get(&self, id: &str) -> Option<Session> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        match entries.get(id) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                metrics::increment_counter("ael.session_cache.hit");
                Some(entry.session.clone())
            }
            Some(_) => {
                metrics::increment_counter("ael.session_cache.expired");
                if let Some((_, expired)) = entries.pop_entry(id) {
                    expired.session.dispose_if_unused();
                }
                None
            }
            None => {
                metrics::increment_counter("ael.session_cache.miss");
                None
            }
        }
    }

    /// Inserts a session, tearing down whatever the insert displaces.
    pub(crate) fn insert(&self, id: String, session: Session) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, evicted)) = entries.push(
            id,
            CachedSession {
                session,
                cached_at: Instant::now(),
            },
        ) {
            evicted.session.dispose_if_unused();
        }
    }

    /// Closes every cached session.
    pub(crate) fn close(&self) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some((_, entry)) = entries.pop_lru() {
            entry.session.dispose_if_unused();
        }
        Ok(())
    }
}
