use crate::crypto::Aes256GcmAead;
use crate::envelope::{DataRowRecord, EnvelopeEncryption};
use crate::error::{Error, Result};
use crate::key::cache::KeyCache;
use crate::metrics::{self, Timer};
use crate::partition::DefaultPartition;
use crate::policy::CryptoPolicy;
use crate::session_cache::SessionCache;
use crate::{Aead, KeyManagementService, Loader, Metastore, Storer};
use std::sync::Arc;

/// A session scoped to one partition, the caller-facing encryption surface
///
/// Sessions are cheap to clone and safe to share across threads. A session
/// obtained from a caching factory defers its teardown to the factory.
#[derive(Clone)]
pub struct Session {
    encryption: Arc<EnvelopeEncryption>,
    cached: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("encryption", &self.encryption)
            .field("cached", &self.cached)
            .finish()
    }
}

impl Session {
    fn new(encryption: Arc<EnvelopeEncryption>, cached: bool) -> Self {
        Self { encryption, cached }
    }

    /// Encrypts a payload, returning a self-describing data row record
    pub fn encrypt(&self, data: &[u8]) -> Result<DataRowRecord> {
        let _timer = Timer::start("ael.session.encrypt.time");
        self.encryption.encrypt_payload(data)
    }

    /// Decrypts a data row record, returning the original payload
    pub fn decrypt(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        let _timer = Timer::start("ael.session.decrypt.time");
        self.encryption.decrypt_data_row_record(drr)
    }

    /// Encrypts a payload and returns the record's opaque JSON byte form
    pub fn encrypt_to_json(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.encrypt(data)?.to_json_bytes()
    }

    /// Decrypts a record from its opaque JSON byte form
    pub fn decrypt_from_json(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.decrypt(&DataRowRecord::from_json_bytes(bytes)?)
    }

    /// Encrypts `data` and stores the resulting record, returning the
    /// persistence key
    pub fn store<S: Storer>(&self, data: &[u8], storer: &S) -> Result<S::Key> {
        let drr = self.encrypt(data)?;
        storer.store(&drr)
    }

    /// Loads the record for `key` and decrypts it
    pub fn load<L: Loader>(&self, key: &L::Key, loader: &L) -> Result<Vec<u8>> {
        let drr = loader
            .load(key)?
            .ok_or_else(|| Error::NotFound("no record for persistence key".to_string()))?;
        self.decrypt(&drr)
    }

    /// Closes the session and its per-partition key cache.
    ///
    /// For sessions owned by a caching factory this is a no-op; the factory
    /// tears the session down on eviction or factory close.
    pub fn close(&self) -> Result<()> {
        if self.cached {
            return Ok(());
        }
        self.encryption.close()
    }

    /// Tears the session down unless other handles are still live.
    pub(crate) fn dispose_if_unused(&self) {
        if Arc::strong_count(&self.encryption) <= 1 {
            if let Err(e) = self.encryption.close() {
                log::warn!("failed to close evicted session: {e}");
            }
        }
    }
}

/// A factory that builds sessions for partitions from shared components
///
/// The factory owns the system key cache (system keys are shared by every
/// partition of a `(service, product)` pair) and, when enabled by policy, a
/// TTL'd LRU cache of sessions keyed by partition id.
pub struct SessionFactory {
    service: String,
    product: String,
    policy: Arc<CryptoPolicy>,
    kms: Arc<dyn KeyManagementService>,
    metastore: Arc<dyn Metastore>,
    crypto: Arc<dyn Aead>,
    sk_cache: Arc<KeyCache>,
    session_cache: Option<SessionCache>,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("service", &self.service)
            .field("product", &self.product)
            .finish()
    }
}

impl SessionFactory {
    /// Creates a new SessionFactory
    pub fn new(
        product: impl Into<String>,
        service: impl Into<String>,
        metastore: Arc<dyn Metastore>,
        kms: Arc<dyn KeyManagementService>,
        policy: CryptoPolicy,
    ) -> Self {
        let policy = Arc::new(policy);
        let sk_cache = Arc::new(KeyCache::new("system", policy.revoke_check_millis()));
        let session_cache = policy.cache_sessions.then(|| {
            SessionCache::new(policy.session_cache_max_size, policy.session_cache_duration)
        });

        Self {
            service: service.into(),
            product: product.into(),
            policy,
            kms,
            metastore,
            crypto: Arc::new(Aes256GcmAead::new()),
            sk_cache,
            session_cache,
        }
    }

    /// Creates a builder for SessionFactory
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::default()
    }

    /// Returns a session for the given partition id, reusing a cached
    /// session when session caching is enabled
    pub fn get_session(&self, partition_id: impl Into<String>) -> Result<Session> {
        let id = partition_id.into();
        if id.is_empty() {
            return Err(Error::InvalidArgument(
                "partition id cannot be empty".to_string(),
            ));
        }

        if let Some(cache) = &self.session_cache {
            if let Some(session) = cache.get(&id) {
                return Ok(session);
            }

            let session = self.new_session(&id, true)?;
            cache.insert(id, session.clone());
            return Ok(session);
        }

        self.new_session(&id, false)
    }

    fn new_session(&self, partition_id: &str, cached: bool) -> Result<Session> {
        metrics::increment_counter("ael.session.created");

        let partition = Arc::new(DefaultPartition::new(
            partition_id,
            &self.service,
            &self.product,
        ));

        // Each partition gets its own intermediate key cache: the cache is
        // keyed by creation time, so entries from different partitions must
        // not share a map. The system key cache is factory-wide.
        let ik_cache = Arc::new(KeyCache::new(
            "intermediate",
            self.policy.revoke_check_millis(),
        ));

        let encryption = EnvelopeEncryption::builder()
            .with_partition(partition)
            .with_metastore(Arc::clone(&self.metastore))
            .with_kms(Arc::clone(&self.kms))
            .with_policy(Arc::clone(&self.policy))
            .with_crypto(Arc::clone(&self.crypto))
            .with_system_key_cache(Arc::clone(&self.sk_cache))
            .with_intermediate_key_cache(ik_cache)
            .build()?;

        Ok(Session::new(Arc::new(encryption), cached))
    }

    /// Closes the factory: cached sessions are torn down and the shared
    /// system key cache is closed
    pub fn close(&self) -> Result<()> {
        if let Some(cache) = &self.session_cache {
            cache.close()?;
        }
        self.sk_cache.close()
    }
}

/// Builder for SessionFactory
#[derive(Default)]
pub struct SessionFactoryBuilder {
    service: Option<String>,
    product: Option<String>,
    policy: Option<CryptoPolicy>,
    kms: Option<Arc<dyn KeyManagementService>>,
    metastore: Option<Arc<dyn Metastore>>,
    crypto: Option<Arc<dyn Aead>>,
}

impl SessionFactoryBuilder {
    /// Creates a new SessionFactoryBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service id
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the product id
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Sets the crypto policy
    pub fn with_policy(mut self, policy: CryptoPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the key management service
    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    /// Sets the metastore
    pub fn with_metastore(mut self, metastore: Arc<dyn Metastore>) -> Self {
        self.metastore = Some(metastore);
        self
    }

    /// Overrides the AEAD implementation (AES-256-GCM by default)
    pub fn with_crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Builds the SessionFactory
    pub fn build(self) -> Result<SessionFactory> {
        let service = self
            .service
            .ok_or_else(|| Error::Config("service id is required".to_string()))?;
        let product = self
            .product
            .ok_or_else(|| Error::Config("product id is required".to_string()))?;
        let policy = self
            .policy
            .ok_or_else(|| Error::Config("crypto policy is required".to_string()))?;
        let kms = self
            .kms
            .ok_or_else(|| Error::Config("key management service is required".to_string()))?;
        let metastore = self
            .metastore
            .ok_or_else(|| Error::Config("metastore is required".to_string()))?;

        let mut factory = SessionFactory::new(product, service, metastore, kms, policy);
        if let Some(crypto) = self.crypto {
            factory.crypto = crypto;
        }

        Ok(factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::StaticKeyManagementService;
    use crate::metastore::InMemoryMetastore;
    use crate::persistence::MemoryPersistence;
    use std::time::Duration;

    fn test_factory(policy: CryptoPolicy) -> SessionFactory {
        SessionFactory::new(
            "prod-x",
            "svc-a",
            Arc::new(InMemoryMetastore::new()),
            Arc::new(
                StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec())
                    .expect("kms"),
            ),
            policy,
        )
    }

    #[test]
    fn sessions_round_trip_payloads() {
        let factory = test_factory(CryptoPolicy::new());
        let session = factory.get_session("shopper-1").expect("session");

        let drr = session.encrypt(b"mysupersecretpayload").expect("encrypt");
        assert_eq!(
            drr.key.parent_key_meta.as_ref().expect("parent").id,
            "_IK_shopper-1_svc-a_prod-x"
        );

        let other = factory.get_session("shopper-1").expect("second session");
        assert_eq!(other.decrypt(&drr).expect("decrypt"), b"mysupersecretpayload");
    }

    #[test]
    fn empty_partition_id_is_rejected() {
        let factory = test_factory(CryptoPolicy::new());
        assert!(matches!(
            factory.get_session(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn session_cache_reuses_sessions() {
        let factory = test_factory(CryptoPolicy::new().with_session_cache());

        let first = factory.get_session("shopper-1").expect("first");
        let second = factory.get_session("shopper-1").expect("second");
        assert!(Arc::ptr_eq(&first.encryption, &second.encryption));

        let other = factory.get_session("shopper-2").expect("other");
        assert!(!Arc::ptr_eq(&first.encryption, &other.encryption));
    }

    #[test]
    fn expired_cache_entries_are_replaced() {
        let factory = test_factory(
            CryptoPolicy::new()
                .with_session_cache()
                .with_session_cache_duration(Duration::ZERO),
        );

        let first = factory.get_session("shopper-1").expect("first");
        let second = factory.get_session("shopper-1").expect("second");
        assert!(!Arc::ptr_eq(&first.encryption, &second.encryption));
    }

    #[test]
    fn cached_session_close_is_deferred() {
        let factory = test_factory(CryptoPolicy::new().with_session_cache());
        let session = factory.get_session("shopper-1").expect("session");

        session.close().expect("close");
        // The session still works; the cache owns its lifetime.
        session.encrypt(b"still alive").expect("encrypt");
    }

    #[test]
    fn factory_close_shuts_shared_caches() {
        // Leave the per-session intermediate cache off so every operation
        // resolves keys through the factory-owned system key cache.
        let mut policy = CryptoPolicy::new();
        policy.cache_intermediate_keys = false;

        let factory = test_factory(policy);
        let session = factory.get_session("shopper-1").expect("session");
        session.encrypt(b"data").expect("encrypt");

        factory.close().expect("close");
        assert!(matches!(
            session.encrypt(b"data"),
            Err(Error::CacheClosed)
        ));
    }

    #[test]
    fn store_and_load_round_trip() {
        let factory = test_factory(CryptoPolicy::new());
        let session = factory.get_session("shopper-1").expect("session");
        let persistence = MemoryPersistence::new();

        let key = session.store(b"persisted", &persistence).expect("store");
        let loaded = session.load(&key, &persistence).expect("load");
        assert_eq!(loaded, b"persisted");

        assert!(matches!(
            session.load(&"missing".to_string(), &persistence),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn json_byte_form_round_trips() {
        let factory = test_factory(CryptoPolicy::new());
        let session = factory.get_session("shopper-1").expect("session");

        let bytes = session.encrypt_to_json(b"payload").expect("encrypt");
        assert_eq!(session.decrypt_from_json(&bytes).expect("decrypt"), b"payload");
    }

    #[test]
    fn builder_requires_all_components() {
        assert!(matches!(
            SessionFactory::builder().build(),
            Err(Error::Config(_))
        ));

        let factory = SessionFactory::builder()
            .with_service("svc-a")
            .with_product("prod-x")
            .with_policy(CryptoPolicy::new())
            .with_kms(Arc::new(
                StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec())
                    .expect("kms"),
            ))
            .with_metastore(Arc::new(InMemoryMetastore::new()))
            .build()
            .expect("factory");

        factory.get_session("shopper-1").expect("session");
    }
}
