//! Typed configuration for building a session factory
//!
//! [`Options`] mirrors the configuration surface shared by the Asherah
//! server and reference applications. Hosts parse it from their own config
//! files (it derives serde with camelCase field names) and hand it to
//! [`Options::build_factory`], which validates every option and wires up the
//! matching metastore, KMS, and policy. Invalid combinations surface as
//! [`Error::Config`] at build time.

use crate::error::{Error, Result};
use crate::kms::StaticKeyManagementService;
use crate::metastore::InMemoryMetastore;
use crate::policy::{CryptoPolicy, KeyRotationStrategy};
use crate::session::SessionFactory;
use crate::{KeyManagementService, Metastore, AES256_KEY_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Metastore backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetastoreType {
    /// In-memory metastore, for testing and development
    Memory,
    /// Relational metastore (MySQL; requires the `mysql` feature)
    Rdbms,
    /// DynamoDB metastore (requires the `aws-dynamodb` feature)
    DynamoDb,
}

/// KMS backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsType {
    /// Static in-process master key, for testing and development
    Static,
    /// AWS KMS (requires the `aws-kms` feature)
    Aws,
}

/// Configuration options for a session factory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Days until a key expires and is rotated
    #[serde(default = "defaults::key_expiration_days")]
    pub key_expiration_days: u32,

    /// Minutes a cached key is trusted before the metastore is re-checked
    #[serde(default = "defaults::revoke_check_minutes")]
    pub revoke_check_minutes: u32,

    /// Which metastore backend to use
    pub metastore_type: MetastoreType,

    /// Connection string for the relational metastore
    #[serde(default)]
    pub metastore_connection_string: Option<String>,

    /// Table name for the DynamoDB metastore
    #[serde(default)]
    pub metastore_table_name: Option<String>,

    /// Enables the region suffix on metastore ids (DynamoDB only)
    #[serde(default)]
    pub metastore_region_suffix: bool,

    /// Which KMS backend to use
    pub kms_type: KmsType,

    /// Master key for the static KMS; must be exactly 32 bytes
    #[serde(default)]
    pub kms_static_key: Option<String>,

    /// Region to master-key-ARN map for the AWS KMS
    #[serde(default)]
    pub kms_aws_region_arns: Option<HashMap<String, String>>,

    /// Preferred region for the AWS KMS
    #[serde(default)]
    pub kms_aws_preferred_region: Option<String>,

    /// Payload cipher; only `aes-256-gcm` is supported
    #[serde(default = "defaults::cipher")]
    pub cipher: String,

    /// Rotation strategy for expired keys
    #[serde(default = "defaults::key_rotation_strategy")]
    pub key_rotation_strategy: String,

    /// Whether to cache system keys
    #[serde(default = "defaults::yes")]
    pub can_cache_system_keys: bool,

    /// Whether to cache intermediate keys
    #[serde(default = "defaults::yes")]
    pub can_cache_intermediate_keys: bool,

    /// Whether to cache sessions
    #[serde(default)]
    pub can_cache_sessions: bool,

    /// Maximum number of cached sessions
    #[serde(default = "defaults::session_cache_max_size")]
    pub session_cache_max_size: usize,

    /// Milliseconds a cached session stays usable
    #[serde(default = "defaults::session_cache_expire_millis")]
    pub session_cache_expire_millis: u64,
}

mod defaults {
    pub(super) fn key_expiration_days() -> u32 {
        90
    }

    pub(super) fn revoke_check_minutes() -> u32 {
        60
    }

    pub(super) fn cipher() -> String {
        "aes-256-gcm".to_string()
    }

    pub(super) fn key_rotation_strategy() -> String {
        "inline".to_string()
    }

    pub(super) fn yes() -> bool {
        true
    }

    pub(super) fn session_cache_max_size() -> usize {
        crate::policy::DEFAULT_SESSION_CACHE_MAX_SIZE
    }

    pub(super) fn session_cache_expire_millis() -> u64 {
        crate::policy::DEFAULT_SESSION_CACHE_DURATION.as_millis() as u64
    }
}

impl Options {
    /// Builds a session factory for the given product and service ids
    pub fn build_factory(
        &self,
        product_id: impl Into<String>,
        service_id: impl Into<String>,
    ) -> Result<SessionFactory> {
        let policy = self.build_policy()?;
        let metastore = self.build_metastore()?;
        let kms = self.build_kms()?;

        Ok(SessionFactory::new(
            product_id,
            service_id,
            metastore,
            kms,
            policy,
        ))
    }

    fn build_policy(&self) -> Result<CryptoPolicy> {
        if self.cipher != "aes-256-gcm" {
            return Err(Error::Config(format!(
                "unsupported cipher {:?}; only aes-256-gcm is available",
                self.cipher
            )));
        }

        let rotation_strategy = match self.key_rotation_strategy.as_str() {
            "inline" => KeyRotationStrategy::Inline,
            "queued" => KeyRotationStrategy::Queued,
            other => {
                return Err(Error::Config(format!(
                    "unknown key rotation strategy {other:?}"
                )))
            }
        };

        let mut policy = CryptoPolicy::new()
            .with_expire_after(Duration::from_secs(u64::from(self.key_expiration_days) * 86_400))
            .with_revoke_check_interval(Duration::from_secs(
                u64::from(self.revoke_check_minutes) * 60,
            ))
            .with_rotation_strategy(rotation_strategy)
            .with_session_cache_max_size(self.session_cache_max_size)
            .with_session_cache_duration(Duration::from_millis(self.session_cache_expire_millis));

        policy.cache_system_keys = self.can_cache_system_keys;
        policy.cache_intermediate_keys = self.can_cache_intermediate_keys;
        policy.cache_sessions = self.can_cache_sessions;

        Ok(policy)
    }

    fn build_metastore(&self) -> Result<Arc<dyn Metastore>> {
        if self.metastore_region_suffix && self.metastore_type != MetastoreType::DynamoDb {
            return Err(Error::Config(
                "the region suffix is only supported by the DynamoDB metastore".to_string(),
            ));
        }

        match self.metastore_type {
            MetastoreType::Memory => Ok(Arc::new(InMemoryMetastore::new())),
            MetastoreType::Rdbms => self.build_rdbms_metastore(),
            MetastoreType::DynamoDb => self.build_dynamodb_metastore(),
        }
    }

    #[cfg(feature = "mysql")]
    fn build_rdbms_metastore(&self) -> Result<Arc<dyn Metastore>> {
        let url = self.metastore_connection_string.as_deref().ok_or_else(|| {
            Error::Config("the rdbms metastore requires a connection string".to_string())
        })?;
        Ok(Arc::new(crate::metastore::MySqlMetastore::connect(url)?))
    }

    #[cfg(not(feature = "mysql"))]
    fn build_rdbms_metastore(&self) -> Result<Arc<dyn Metastore>> {
        if self.metastore_connection_string.is_none() {
            return Err(Error::Config(
                "the rdbms metastore requires a connection string".to_string(),
            ));
        }
        Err(Error::Config(
            "the rdbms metastore requires the `mysql` feature".to_string(),
        ))
    }

    #[cfg(feature = "aws-dynamodb")]
    fn build_dynamodb_metastore(&self) -> Result<Arc<dyn Metastore>> {
        let mut builder = crate::metastore::DynamoDbMetastore::builder()
            .with_region_suffix(self.metastore_region_suffix);
        if let Some(table_name) = &self.metastore_table_name {
            builder = builder.with_table_name(table_name);
        }
        Ok(Arc::new(builder.build()?))
    }

    #[cfg(not(feature = "aws-dynamodb"))]
    fn build_dynamodb_metastore(&self) -> Result<Arc<dyn Metastore>> {
        Err(Error::Config(
            "the dynamodb metastore requires the `aws-dynamodb` feature".to_string(),
        ))
    }

    fn build_kms(&self) -> Result<Arc<dyn KeyManagementService>> {
        match self.kms_type {
            KmsType::Static => {
                let key = self.kms_static_key.as_deref().ok_or_else(|| {
                    Error::Config("the static KMS requires a master key".to_string())
                })?;
                if key.len() != AES256_KEY_SIZE {
                    return Err(Error::Config(format!(
                        "the static KMS master key must be {AES256_KEY_SIZE} bytes, got {}",
                        key.len()
                    )));
                }
                Ok(Arc::new(StaticKeyManagementService::new(
                    key.as_bytes().to_vec(),
                )?))
            }
            KmsType::Aws => self.build_aws_kms(),
        }
    }

    #[cfg(feature = "aws-kms")]
    fn build_aws_kms(&self) -> Result<Arc<dyn KeyManagementService>> {
        let region_arns = self.kms_aws_region_arns.as_ref().ok_or_else(|| {
            Error::Config("the AWS KMS requires a region-to-ARN map".to_string())
        })?;
        let preferred = self.kms_aws_preferred_region.as_ref().ok_or_else(|| {
            Error::Config("the AWS KMS requires a preferred region".to_string())
        })?;

        let mut builder = crate::kms::AwsKeyManagementService::builder()
            .with_preferred_region(preferred);
        for (region, arn) in region_arns {
            builder = builder.with_region_arn(region, arn);
        }
        Ok(Arc::new(builder.build()?))
    }

    #[cfg(not(feature = "aws-kms"))]
    fn build_aws_kms(&self) -> Result<Arc<dyn KeyManagementService>> {
        if self.kms_aws_region_arns.is_none() || self.kms_aws_preferred_region.is_none() {
            return Err(Error::Config(
                "the AWS KMS requires a region-to-ARN map and a preferred region".to_string(),
            ));
        }
        Err(Error::Config(
            "the AWS KMS requires the `aws-kms` feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_memory_options() -> Options {
        serde_json::from_value(serde_json::json!({
            "metastoreType": "memory",
            "kmsType": "static",
            "kmsStaticKey": "thisIsAStaticMasterKeyForTesting",
        }))
        .expect("options")
    }

    #[test]
    fn defaults_are_applied_from_json() {
        let options = static_memory_options();
        assert_eq!(options.key_expiration_days, 90);
        assert_eq!(options.revoke_check_minutes, 60);
        assert_eq!(options.cipher, "aes-256-gcm");
        assert_eq!(options.key_rotation_strategy, "inline");
        assert!(options.can_cache_system_keys);
        assert!(!options.can_cache_sessions);
    }

    #[test]
    fn static_memory_factory_round_trips() {
        let factory = static_memory_options()
            .build_factory("prod-x", "svc-a")
            .expect("factory");

        let session = factory.get_session("shopper-1").expect("session");
        let drr = session.encrypt(b"payload").expect("encrypt");
        assert_eq!(session.decrypt(&drr).expect("decrypt"), b"payload");
    }

    #[test]
    fn unsupported_cipher_is_rejected() {
        let mut options = static_memory_options();
        options.cipher = "chacha20-poly1305".to_string();
        assert!(matches!(
            options.build_factory("prod-x", "svc-a"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn unknown_rotation_strategy_is_rejected() {
        let mut options = static_memory_options();
        options.key_rotation_strategy = "eventually".to_string();
        assert!(matches!(
            options.build_factory("prod-x", "svc-a"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn static_kms_key_must_be_32_bytes() {
        let mut options = static_memory_options();
        options.kms_static_key = Some("tooShort".to_string());
        assert!(matches!(
            options.build_factory("prod-x", "svc-a"),
            Err(Error::Config(_))
        ));

        options.kms_static_key = None;
        assert!(matches!(
            options.build_factory("prod-x", "svc-a"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rdbms_requires_connection_string() {
        let mut options = static_memory_options();
        options.metastore_type = MetastoreType::Rdbms;
        assert!(matches!(
            options.build_factory("prod-x", "svc-a"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn region_suffix_is_dynamodb_only() {
        let mut options = static_memory_options();
        options.metastore_region_suffix = true;
        assert!(matches!(
            options.build_factory("prod-x", "svc-a"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn queued_strategy_is_accepted() {
        let mut options = static_memory_options();
        options.key_rotation_strategy = "queued".to_string();
        options.build_factory("prod-x", "svc-a").expect("factory");
    }
}
