use crate::envelope::EnvelopeKeyRecord;
use crate::error::{Error, Result};
use crate::Metastore;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// An in-memory implementation of the Metastore trait
///
/// Records are kept in a per-id ordered map so `load_latest` is the greatest
/// `created`. Useful for testing and development; keys are lost when the
/// process exits.
#[derive(Debug, Default)]
pub struct InMemoryMetastore {
    store: RwLock<HashMap<String, BTreeMap<i64, EnvelopeKeyRecord>>>,
}

impl InMemoryMetastore {
    /// Creates a new InMemoryMetastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the record at `(id, created)` revoked in place. Returns false
    /// if no such record exists.
    ///
    /// Revocation is an operator action (rotation tooling); it is the only
    /// mutation the metastore permits on an existing row.
    pub fn mark_revoked(&self, id: &str, created: i64) -> bool {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        match store.get_mut(id).and_then(|rows| rows.get_mut(&created)) {
            Some(record) => {
                record.revoked = Some(true);
                true
            }
            None => false,
        }
    }
}

impl Metastore for InMemoryMetastore {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store
            .get(id)
            .and_then(|rows| rows.get(&created))
            .cloned())
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store
            .get(id)
            .and_then(|rows| rows.values().next_back())
            .cloned())
    }

    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
        if id.is_empty() {
            return Err(Error::InvalidArgument(
                "metastore id cannot be empty".to_string(),
            ));
        }
        if record.encrypted_key.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot store a record with empty key material".to_string(),
            ));
        }

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let rows = store.entry(id.to_string()).or_default();

        if rows.contains_key(&created) {
            return Ok(false);
        }

        rows.insert(created, record.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::KeyMeta;
    use std::sync::Arc;
    use std::thread;

    fn record(created: i64) -> EnvelopeKeyRecord {
        EnvelopeKeyRecord {
            created,
            encrypted_key: vec![created as u8, 1, 2],
            parent_key_meta: Some(KeyMeta::new("_SK_svc_prod", created)),
            revoked: None,
        }
    }

    #[test]
    fn stored_records_load_verbatim() {
        let metastore = InMemoryMetastore::new();
        let rec = record(100);

        assert!(metastore.store("ik", 100, &rec).expect("store"));
        assert_eq!(metastore.load("ik", 100).expect("load"), Some(rec));
        assert_eq!(metastore.load("ik", 200).expect("load miss"), None);
        assert_eq!(metastore.load("other", 100).expect("load miss"), None);
    }

    #[test]
    fn duplicate_store_returns_false_and_keeps_original() {
        let metastore = InMemoryMetastore::new();
        let original = record(100);
        let imposter = EnvelopeKeyRecord {
            encrypted_key: vec![0xff],
            ..record(100)
        };

        assert!(metastore.store("ik", 100, &original).expect("store"));
        assert!(!metastore.store("ik", 100, &imposter).expect("dup store"));
        assert_eq!(metastore.load("ik", 100).expect("load"), Some(original));
    }

    #[test]
    fn load_latest_returns_greatest_created() {
        let metastore = InMemoryMetastore::new();
        metastore.store("ik", 200, &record(200)).expect("store");
        metastore.store("ik", 100, &record(100)).expect("store");
        metastore.store("ik", 300, &record(300)).expect("store");

        let latest = metastore.load_latest("ik").expect("load").expect("latest");
        assert_eq!(latest.created, 300);
        assert_eq!(metastore.load_latest("missing").expect("load"), None);
    }

    #[test]
    fn empty_key_material_is_rejected() {
        let metastore = InMemoryMetastore::new();
        let empty = EnvelopeKeyRecord {
            encrypted_key: Vec::new(),
            ..record(100)
        };

        assert!(matches!(
            metastore.store("ik", 100, &empty),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            metastore.store("", 100, &record(100)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn mark_revoked_updates_in_place() {
        let metastore = InMemoryMetastore::new();
        metastore.store("ik", 100, &record(100)).expect("store");

        assert!(metastore.mark_revoked("ik", 100));
        assert!(!metastore.mark_revoked("ik", 200));

        let loaded = metastore.load("ik", 100).expect("load").expect("record");
        assert_eq!(loaded.revoked, Some(true));
    }

    #[test]
    fn concurrent_stores_admit_exactly_one_writer() {
        let metastore = Arc::new(InMemoryMetastore::new());

        let handles: Vec<_> = (0..8_u8)
            .map(|i| {
                let metastore = Arc::clone(&metastore);
                thread::spawn(move || {
                    let rec = EnvelopeKeyRecord {
                        created: 1_700_000_000,
                        encrypted_key: vec![i + 1],
                        parent_key_meta: None,
                        revoked: None,
                    };
                    metastore
                        .store("_SK_svc-a_prod-x", 1_700_000_000, &rec)
                        .expect("store")
                        .then_some(rec)
                })
            })
            .collect();

        let winners: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().expect("join"))
            .collect();

        assert_eq!(winners.len(), 1);
        let stored = metastore
            .load("_SK_svc-a_prod-x", 1_700_000_000)
            .expect("load")
            .expect("record");
        assert_eq!(stored, winners[0]);
    }
}
