use crate::envelope::EnvelopeKeyRecord;
use crate::error::Result;
use crate::Metastore;

/// Decorator that scopes another metastore's ids to a region
///
/// Multi-region deployments replicating a last-writer-wins store cannot rely
/// on the backend's conditional insert across regions, so each region writes
/// under `<id>_<region>` instead. Reads opting into the suffix use it
/// consistently; a reader without the suffix will not observe suffixed rows.
/// The engine is unaware of the suffix, as it is purely a property of the
/// metastore.
#[derive(Debug)]
pub struct SuffixedMetastore<M> {
    inner: M,
    suffix: String,
}

impl<M: Metastore> SuffixedMetastore<M> {
    /// Wraps `inner`, suffixing every id with `_<suffix>`
    pub fn new(inner: M, suffix: impl Into<String>) -> Self {
        Self {
            inner,
            suffix: suffix.into(),
        }
    }

    /// Returns the configured suffix
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    fn effective_id(&self, id: &str) -> String {
        format!("{id}_{}", self.suffix)
    }
}

impl<M: Metastore> Metastore for SuffixedMetastore<M> {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        self.inner.load(&self.effective_id(id), created)
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        self.inner.load_latest(&self.effective_id(id))
    }

    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
        self.inner.store(&self.effective_id(id), created, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::InMemoryMetastore;
    use std::sync::Arc;

    fn record(created: i64) -> EnvelopeKeyRecord {
        EnvelopeKeyRecord {
            created,
            encrypted_key: vec![1, 2, 3],
            parent_key_meta: None,
            revoked: None,
        }
    }

    #[test]
    fn writes_land_under_the_suffixed_id() {
        let shared = Arc::new(InMemoryMetastore::new());
        let suffixed = SuffixedMetastore::new(Arc::clone(&shared), "us-west-2");

        assert!(suffixed
            .store("_SK_svc_prod", 1_700_000_000, &record(1_700_000_000))
            .expect("store"));

        // A reader with the suffix disabled does not see the row.
        assert_eq!(
            shared.load("_SK_svc_prod", 1_700_000_000).expect("load"),
            None
        );
        assert!(shared
            .load("_SK_svc_prod_us-west-2", 1_700_000_000)
            .expect("load")
            .is_some());
    }

    #[test]
    fn reads_use_the_suffix_consistently() {
        let shared = Arc::new(InMemoryMetastore::new());
        let suffixed = SuffixedMetastore::new(Arc::clone(&shared), "us-west-2");

        suffixed
            .store("_SK_svc_prod", 1_700_000_000, &record(1_700_000_000))
            .expect("store");

        assert!(suffixed
            .load("_SK_svc_prod", 1_700_000_000)
            .expect("load")
            .is_some());
        assert!(suffixed
            .load_latest("_SK_svc_prod")
            .expect("load_latest")
            .is_some());

        // Rows written without the suffix are invisible through it.
        shared
            .store("_SK_other_prod", 1_700_000_000, &record(1_700_000_000))
            .expect("store");
        assert_eq!(suffixed.load_latest("_SK_other_prod").expect("load"), None);
    }
}
