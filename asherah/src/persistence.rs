//! Persistence helpers for data row records
//!
//! [`Storer`] and [`Loader`] let a session encrypt-then-store and
//! load-then-decrypt against any backing store, keyed by a caller-chosen
//! type. [`StorerFn`]/[`LoaderFn`] adapt plain closures, and
//! [`MemoryPersistence`] is a ready-made in-memory store that issues UUID
//! keys.

use crate::envelope::DataRowRecord;
use crate::error::Result;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Stores a data row record and returns a key for future lookup
pub trait Storer: Send + Sync {
    /// Type of the key returned after storing the record
    type Key;

    /// Stores a data row record and returns its key
    fn store(&self, drr: &DataRowRecord) -> Result<Self::Key>;
}

/// Loads a data row record by key
pub trait Loader: Send + Sync {
    /// Type of the key used to look up the record
    type Key;

    /// Loads the record for `key`, or `None` if absent
    fn load(&self, key: &Self::Key) -> Result<Option<DataRowRecord>>;
}

/// Adapts a closure into a [`Storer`]
pub struct StorerFn<F, K> {
    f: F,
    _key: PhantomData<fn() -> K>,
}

impl<F, K> StorerFn<F, K>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
{
    /// Creates a storer from the given closure
    pub fn new(f: F) -> Self {
        Self {
            f,
            _key: PhantomData,
        }
    }
}

impl<F, K> Storer for StorerFn<F, K>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
{
    type Key = K;

    fn store(&self, drr: &DataRowRecord) -> Result<K> {
        (self.f)(drr)
    }
}

/// Adapts a closure into a [`Loader`]
pub struct LoaderFn<F, K> {
    f: F,
    _key: PhantomData<fn() -> K>,
}

impl<F, K> LoaderFn<F, K>
where
    F: Fn(&K) -> Result<Option<DataRowRecord>> + Send + Sync,
{
    /// Creates a loader from the given closure
    pub fn new(f: F) -> Self {
        Self {
            f,
            _key: PhantomData,
        }
    }
}

impl<F, K> Loader for LoaderFn<F, K>
where
    F: Fn(&K) -> Result<Option<DataRowRecord>> + Send + Sync,
{
    type Key = K;

    fn load(&self, key: &K) -> Result<Option<DataRowRecord>> {
        (self.f)(key)
    }
}

/// An in-memory persistence store keyed by generated UUIDs
///
/// Useful for testing and development.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: RwLock<HashMap<String, DataRowRecord>>,
}

impl MemoryPersistence {
    /// Creates a new MemoryPersistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no records are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storer for MemoryPersistence {
    type Key = String;

    fn store(&self, drr: &DataRowRecord) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), drr.clone());
        Ok(key)
    }
}

impl Loader for MemoryPersistence {
    type Key = String;

    fn load(&self, key: &String) -> Result<Option<DataRowRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}
