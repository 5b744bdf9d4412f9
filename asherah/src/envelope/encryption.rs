use crate::envelope::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
use crate::error::{Error, Result};
use crate::key::cache::KeyCache;
use crate::key::{CryptoKey, KeyHandle};
use crate::metrics::{self, Timer};
use crate::partition::Partition;
use crate::policy::{self, CryptoPolicy};
use crate::util;
use crate::{Aead, KeyManagementService, Metastore, AES256_KEY_SIZE};
use std::sync::Arc;
use zeroize::Zeroize;

// A lost create race means another writer succeeded, so one reload normally
// settles it. The bound guards against pathological clock skew.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Implementation of envelope encryption for a single partition
///
/// Encrypt wraps the payload under a fresh data row key, the data row key
/// under the partition's intermediate key, and the intermediate key under the
/// system key, which is itself wrapped by the KMS master key. Decrypt walks
/// the same chain in reverse, consulting the key caches first.
pub struct EnvelopeEncryption {
    partition: Arc<dyn Partition>,
    metastore: Arc<dyn Metastore>,
    kms: Arc<dyn KeyManagementService>,
    policy: Arc<CryptoPolicy>,
    crypto: Arc<dyn Aead>,
    sk_cache: Arc<KeyCache>,
    ik_cache: Arc<KeyCache>,
}

impl std::fmt::Debug for EnvelopeEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeEncryption")
            .field("partition", &self.partition)
            .finish()
    }
}

/// Builder for EnvelopeEncryption
#[derive(Default)]
pub struct EnvelopeEncryptionBuilder {
    partition: Option<Arc<dyn Partition>>,
    metastore: Option<Arc<dyn Metastore>>,
    kms: Option<Arc<dyn KeyManagementService>>,
    policy: Option<Arc<CryptoPolicy>>,
    crypto: Option<Arc<dyn Aead>>,
    sk_cache: Option<Arc<KeyCache>>,
    ik_cache: Option<Arc<KeyCache>>,
}

impl EnvelopeEncryptionBuilder {
    /// Creates a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition
    pub fn with_partition(mut self, partition: Arc<dyn Partition>) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Sets the metastore
    pub fn with_metastore(mut self, metastore: Arc<dyn Metastore>) -> Self {
        self.metastore = Some(metastore);
        self
    }

    /// Sets the KMS
    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    /// Sets the crypto policy
    pub fn with_policy(mut self, policy: Arc<CryptoPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the AEAD implementation
    pub fn with_crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Sets the system key cache; defaults to a fresh cache sized by the
    /// policy's revoke-check interval
    pub fn with_system_key_cache(mut self, cache: Arc<KeyCache>) -> Self {
        self.sk_cache = Some(cache);
        self
    }

    /// Sets the intermediate key cache; defaults to a fresh cache sized by
    /// the policy's revoke-check interval
    pub fn with_intermediate_key_cache(mut self, cache: Arc<KeyCache>) -> Self {
        self.ik_cache = Some(cache);
        self
    }

    /// Builds the EnvelopeEncryption
    pub fn build(self) -> Result<EnvelopeEncryption> {
        let partition = self
            .partition
            .ok_or_else(|| Error::InvalidArgument("partition is required".to_string()))?;
        let metastore = self
            .metastore
            .ok_or_else(|| Error::InvalidArgument("metastore is required".to_string()))?;
        let kms = self
            .kms
            .ok_or_else(|| Error::InvalidArgument("kms is required".to_string()))?;
        let policy = self
            .policy
            .ok_or_else(|| Error::InvalidArgument("policy is required".to_string()))?;
        let crypto = self
            .crypto
            .ok_or_else(|| Error::InvalidArgument("crypto is required".to_string()))?;

        let revoke_check = policy.revoke_check_millis();
        let sk_cache = self
            .sk_cache
            .unwrap_or_else(|| Arc::new(KeyCache::new("system", revoke_check)));
        let ik_cache = self
            .ik_cache
            .unwrap_or_else(|| Arc::new(KeyCache::new("intermediate", revoke_check)));

        Ok(EnvelopeEncryption {
            partition,
            metastore,
            kms,
            policy,
            crypto,
            sk_cache,
            ik_cache,
        })
    }
}

impl EnvelopeEncryption {
    /// Creates a builder for EnvelopeEncryption
    pub fn builder() -> EnvelopeEncryptionBuilder {
        EnvelopeEncryptionBuilder::new()
    }

    /// Encrypts a payload, returning a self-describing data row record
    pub fn encrypt_payload(&self, data: &[u8]) -> Result<DataRowRecord> {
        metrics::increment_counter("ael.envelope.encrypt");
        let _timer = Timer::start("ael.envelope.encrypt.time");

        let intermediate_key = self.get_or_create_intermediate_key()?;

        let mut data_key = util::get_rand_bytes(AES256_KEY_SIZE);
        let sealed = (|| {
            let encrypted_data = self.crypto.encrypt(data, &data_key)?;
            let encrypted_data_key = intermediate_key
                .with_key(|ik_bytes| self.crypto.encrypt(&data_key, ik_bytes))?;
            Ok::<_, Error>((encrypted_data, encrypted_data_key))
        })();
        data_key.zeroize();
        let (encrypted_data, encrypted_data_key) = sealed?;

        Ok(DataRowRecord {
            key: EnvelopeKeyRecord {
                created: intermediate_key.created(),
                encrypted_key: encrypted_data_key,
                parent_key_meta: Some(KeyMeta::new(
                    self.partition.intermediate_key_id(),
                    intermediate_key.created(),
                )),
                revoked: None,
            },
            data: encrypted_data,
        })
    }

    /// Decrypts a data row record, returning the original payload
    pub fn decrypt_data_row_record(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        metrics::increment_counter("ael.envelope.decrypt");
        let _timer = Timer::start("ael.envelope.decrypt.time");

        let parent = drr.key.parent_key_meta.as_ref().ok_or_else(|| {
            Error::MalformedEnvelope("data row record has no parent key metadata".to_string())
        })?;

        if !self.partition.is_valid_intermediate_key_id(&parent.id) {
            return Err(Error::Crypto(
                "unable to decrypt record: intermediate key belongs to another partition"
                    .to_string(),
            ));
        }

        let intermediate_key = self.resolve_intermediate_key(parent)?;

        let mut data_key = intermediate_key
            .with_key(|ik_bytes| self.crypto.decrypt(&drr.key.encrypted_key, ik_bytes))?;
        let plaintext = self.crypto.decrypt(&drr.data, &data_key);
        data_key.zeroize();

        plaintext
    }

    /// Closes the per-partition intermediate key cache. The system key cache
    /// is owned by the factory and closed with it.
    pub(crate) fn close(&self) -> Result<()> {
        self.ik_cache.close()
    }

    /// Returns a usable system key, creating and persisting a new one if the
    /// latest is absent, expired, or revoked.
    fn get_or_create_system_key(&self) -> Result<KeyHandle> {
        let _timer = Timer::start("ael.envelope.get_system_key");
        let id = self.partition.system_key_id();

        for _ in 0..MAX_CREATE_ATTEMPTS {
            if self.policy.cache_system_keys {
                if let Some(key) = self.sk_cache.get_last()? {
                    if !self.policy.is_key_expired(key.created()) && !key.is_revoked() {
                        return Ok(key);
                    }
                }
            }

            if let Some(record) = self.metastore.load_latest(&id)? {
                if !self.policy.is_key_expired(record.created) && !record.is_revoked() {
                    return self.system_key_from_record(&record);
                }
                // Latest is expired or revoked; fall through and rotate.
            }

            let created = policy::new_key_timestamp(self.policy.create_date_precision);
            let key = CryptoKey::generate(created, AES256_KEY_SIZE)?;
            let encrypted_key = key.with_key(|raw| self.kms.encrypt_key(raw))?;
            let record = EnvelopeKeyRecord {
                created,
                encrypted_key,
                parent_key_meta: None,
                revoked: None,
            };

            if self.metastore.store(&id, created, &record)? {
                log::debug!("created system key {id} at {created}");
                return self.cache_system_key(key);
            }
            // Lost the create race; another writer succeeded. Reload.
        }

        Err(Error::Metastore(format!(
            "unable to create system key {id} after {MAX_CREATE_ATTEMPTS} attempts"
        )))
    }

    /// Resolves the specific system key a loaded intermediate key was
    /// encrypted under.
    fn resolve_system_key(&self, meta: &KeyMeta) -> Result<KeyHandle> {
        if self.policy.cache_system_keys {
            if let Some(key) = self.sk_cache.get(meta.created)? {
                return Ok(key);
            }
        }

        let record = self
            .metastore
            .load(&meta.id, meta.created)?
            .ok_or_else(|| Error::NotFound(format!("system key {}:{}", meta.id, meta.created)))?;

        self.system_key_from_record(&record)
    }

    fn system_key_from_record(&self, record: &EnvelopeKeyRecord) -> Result<KeyHandle> {
        let mut raw = self.kms.decrypt_key(&record.encrypted_key)?;
        let key = CryptoKey::from_bytes(record.created, record.is_revoked(), &mut raw);
        raw.zeroize();
        let key = key?;

        if self.policy.notify_expired_system_key_on_read && self.policy.is_key_expired(record.created)
        {
            metrics::increment_counter("ael.envelope.system_key.expired_on_read");
            log::debug!("expired system key read, created {}", record.created);
        }

        self.cache_system_key(key)
    }

    fn cache_system_key(&self, key: CryptoKey) -> Result<KeyHandle> {
        if self.policy.cache_system_keys {
            self.sk_cache.put_and_get_usable(key.created(), key)
        } else {
            Ok(KeyHandle::Owning(key))
        }
    }

    /// Returns a usable intermediate key, creating and persisting a new one
    /// if the latest is absent, expired, or revoked.
    fn get_or_create_intermediate_key(&self) -> Result<KeyHandle> {
        let _timer = Timer::start("ael.envelope.get_intermediate_key");
        let id = self.partition.intermediate_key_id();

        for _ in 0..MAX_CREATE_ATTEMPTS {
            if self.policy.cache_intermediate_keys {
                if let Some(key) = self.ik_cache.get_last()? {
                    if !self.policy.is_key_expired(key.created()) && !key.is_revoked() {
                        return Ok(key);
                    }
                }
            }

            if let Some(record) = self.metastore.load_latest(&id)? {
                if !self.policy.is_key_expired(record.created) && !record.is_revoked() {
                    return self.intermediate_key_from_record(&record);
                }
            }

            let system_key = self.get_or_create_system_key()?;
            let created = policy::new_key_timestamp(self.policy.create_date_precision);
            let key = CryptoKey::generate(created, AES256_KEY_SIZE)?;
            let encrypted_key = key.with_key(|raw| {
                system_key.with_key(|sk_bytes| self.crypto.encrypt(raw, sk_bytes))
            })?;
            let record = EnvelopeKeyRecord {
                created,
                encrypted_key,
                parent_key_meta: Some(KeyMeta::new(
                    self.partition.system_key_id(),
                    system_key.created(),
                )),
                revoked: None,
            };

            if self.metastore.store(&id, created, &record)? {
                log::debug!("created intermediate key {id} at {created}");
                return self.cache_intermediate_key(key);
            }
            // Lost the create race; another writer succeeded. Reload.
        }

        Err(Error::Metastore(format!(
            "unable to create intermediate key {id} after {MAX_CREATE_ATTEMPTS} attempts"
        )))
    }

    /// Resolves the specific intermediate key a data row record was encrypted
    /// under.
    fn resolve_intermediate_key(&self, meta: &KeyMeta) -> Result<KeyHandle> {
        if self.policy.cache_intermediate_keys {
            if let Some(key) = self.ik_cache.get(meta.created)? {
                return Ok(key);
            }
        }

        let record = self.metastore.load(&meta.id, meta.created)?.ok_or_else(|| {
            Error::NotFound(format!("intermediate key {}:{}", meta.id, meta.created))
        })?;

        self.intermediate_key_from_record(&record)
    }

    fn intermediate_key_from_record(&self, record: &EnvelopeKeyRecord) -> Result<KeyHandle> {
        let parent = record.parent_key_meta.as_ref().ok_or_else(|| {
            Error::MalformedEnvelope(format!(
                "intermediate key record at {} has no parent key metadata",
                record.created
            ))
        })?;

        let system_key = self.resolve_system_key(parent)?;

        let mut raw = system_key
            .with_key(|sk_bytes| self.crypto.decrypt(&record.encrypted_key, sk_bytes))?;
        let key = CryptoKey::from_bytes(record.created, record.is_revoked(), &mut raw);
        raw.zeroize();
        let key = key?;

        if self.policy.notify_expired_intermediate_key_on_read
            && self.policy.is_key_expired(record.created)
        {
            metrics::increment_counter("ael.envelope.intermediate_key.expired_on_read");
            log::debug!("expired intermediate key read, created {}", record.created);
        }

        self.cache_intermediate_key(key)
    }

    fn cache_intermediate_key(&self, key: CryptoKey) -> Result<KeyHandle> {
        if self.policy.cache_intermediate_keys {
            self.ik_cache.put_and_get_usable(key.created(), key)
        } else {
            Ok(KeyHandle::Owning(key))
        }
    }
}
