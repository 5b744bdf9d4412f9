//! AWS KMS implementation with multi-region support
//!
//! System keys are wrapped in an envelope of their own: a data key is
//! generated in the preferred region, the payload is encrypted under that
//! data key locally, and the data key is encrypted by every configured
//! region's KMS (best effort) so any single region can later unwrap it.
//! The envelope serializes as
//! `{"encryptedKey": "<base64>", "kmsKeks": [{"region", "arn", "encryptedKek"}]}`.

use crate::error::{Error, Result};
use crate::metrics::Timer;
use crate::{Aead, KeyManagementService};
use aws_sdk_kms::config::Region;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{DataKeySpec, EncryptionAlgorithmSpec};
use aws_sdk_kms::Client;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use zeroize::Zeroize;

/// A data key generated by a regional KMS
struct GeneratedDataKey {
    /// ARN of the master key that produced the data key
    key_id: String,

    /// The data key, encrypted by the generating region's master key
    ciphertext_blob: Vec<u8>,

    /// The plaintext data key; wiped before the KMS operation returns
    plaintext: Vec<u8>,
}

/// A KMS client bound to one region's master key
struct RegionalClient {
    client: Client,
    region: String,
    master_key_arn: String,
}

impl RegionalClient {
    async fn generate_data_key(&self) -> Result<GeneratedDataKey> {
        let _timer = Timer::start("ael.kms.aws.generatedatakey");

        let output = self
            .client
            .generate_data_key()
            .key_id(&self.master_key_arn)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| Error::Kms(format!("generate data key failed: {e}")))?;

        Ok(GeneratedDataKey {
            key_id: output
                .key_id()
                .unwrap_or(self.master_key_arn.as_str())
                .to_string(),
            ciphertext_blob: output
                .ciphertext_blob()
                .map(|b| b.as_ref().to_vec())
                .ok_or_else(|| Error::Kms("no ciphertext blob returned".to_string()))?,
            plaintext: output
                .plaintext()
                .map(|b| b.as_ref().to_vec())
                .ok_or_else(|| Error::Kms("no plaintext returned".to_string()))?,
        })
    }

    async fn encrypt_kek(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let _timer = Timer::start("ael.kms.aws.encryptkek");

        let output = self
            .client
            .encrypt()
            .key_id(&self.master_key_arn)
            .encryption_algorithm(EncryptionAlgorithmSpec::SymmetricDefault)
            .plaintext(Blob::new(plaintext.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Kms(format!("encrypt failed: {e}")))?;

        output
            .ciphertext_blob()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| Error::Kms("no ciphertext blob returned".to_string()))
    }

    async fn decrypt_kek(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let _timer = Timer::start("ael.kms.aws.decryptkek");

        let output = self
            .client
            .decrypt()
            .key_id(&self.master_key_arn)
            .encryption_algorithm(EncryptionAlgorithmSpec::SymmetricDefault)
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Kms(format!("decrypt failed: {e}")))?;

        output
            .plaintext()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| Error::Kms("no plaintext returned".to_string()))
    }
}

/// One region's encrypted copy of the data key
struct RegionalKek {
    region: String,
    arn: String,
    encrypted_kek: Vec<u8>,
}

/// AWS KMS implementation of the KeyManagementService trait
///
/// The trait surface is synchronous; operations run on a privately owned
/// tokio runtime.
pub struct AwsKeyManagementService {
    clients: Vec<RegionalClient>,
    crypto: Arc<dyn Aead>,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for AwsKeyManagementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsKeyManagementService")
            .field(
                "regions",
                &self.clients.iter().map(|c| &c.region).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AwsKeyManagementService {
    /// Creates a builder for AwsKeyManagementService
    pub fn builder() -> AwsKmsBuilder {
        AwsKmsBuilder::default()
    }

    /// Returns the preferred region
    pub fn preferred_region(&self) -> &str {
        &self.clients[0].region
    }

    async fn generate_data_key(&self) -> Result<GeneratedDataKey> {
        for client in &self.clients {
            match client.generate_data_key().await {
                Ok(data_key) => return Ok(data_key),
                Err(e) => {
                    log::debug!(
                        "data key generation failed in {}, trying next region: {e}",
                        client.region
                    );
                }
            }
        }

        Err(Error::Kms(
            "all regions failed to generate a data key".to_string(),
        ))
    }

    async fn encrypt_key_async(&self, key: &[u8]) -> Result<Vec<u8>> {
        let data_key = self.generate_data_key().await?;
        let mut plaintext = data_key.plaintext;

        let encrypted_key = match self.crypto.encrypt(key, &plaintext) {
            Ok(bytes) => bytes,
            Err(e) => {
                plaintext.zeroize();
                return Err(e);
            }
        };

        // Best effort: regions that fail to encrypt the data key are simply
        // omitted from the envelope.
        let keks = join_all(self.clients.iter().map(|client| {
            let plaintext = &plaintext;
            let data_key = &data_key;
            async move {
                if client.master_key_arn == data_key.key_id {
                    return Some(RegionalKek {
                        region: client.region.clone(),
                        arn: client.master_key_arn.clone(),
                        encrypted_kek: data_key.ciphertext_blob.clone(),
                    });
                }

                match client.encrypt_kek(plaintext).await {
                    Ok(encrypted_kek) => Some(RegionalKek {
                        region: client.region.clone(),
                        arn: client.master_key_arn.clone(),
                        encrypted_kek,
                    }),
                    Err(e) => {
                        log::debug!("data key encryption failed in {}: {e}", client.region);
                        None
                    }
                }
            }
        }))
        .await;
        plaintext.zeroize();

        let keks: Vec<RegionalKek> = keks.into_iter().flatten().collect();
        if keks.is_empty() {
            return Err(Error::Kms(
                "all regions failed to encrypt the data key".to_string(),
            ));
        }

        envelope_to_bytes(&encrypted_key, &keks)
    }

    async fn decrypt_key_async(&self, envelope_bytes: &[u8]) -> Result<Vec<u8>> {
        let (encrypted_key, keks) = envelope_from_bytes(envelope_bytes)?;

        for client in &self.clients {
            let Some(kek) = keks.iter().find(|k| k.region == client.region) else {
                continue;
            };

            let mut data_key = match client.decrypt_kek(&kek.encrypted_kek).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::debug!("KEK decryption failed in {}: {e}", client.region);
                    continue;
                }
            };

            let result = self.crypto.decrypt(&encrypted_key, &data_key);
            data_key.zeroize();

            match result {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => {
                    log::debug!("payload decryption failed in {}: {e}", client.region);
                }
            }
        }

        Err(Error::Kms(
            "unable to decrypt the key in any configured region".to_string(),
        ))
    }
}

impl KeyManagementService for AwsKeyManagementService {
    fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let _timer = Timer::start("ael.kms.aws.encryptkey");
        self.runtime.block_on(self.encrypt_key_async(key))
    }

    fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        let _timer = Timer::start("ael.kms.aws.decryptkey");
        self.runtime.block_on(self.decrypt_key_async(encrypted_key))
    }
}

/// Builder for AwsKeyManagementService
#[derive(Default)]
pub struct AwsKmsBuilder {
    region_arns: Vec<(String, String)>,
    preferred_region: Option<String>,
    crypto: Option<Arc<dyn Aead>>,
}

impl AwsKmsBuilder {
    /// Adds a region and its master key ARN
    pub fn with_region_arn(mut self, region: impl Into<String>, arn: impl Into<String>) -> Self {
        self.region_arns.push((region.into(), arn.into()));
        self
    }

    /// Sets the preferred region, used first for data key generation and
    /// decryption
    pub fn with_preferred_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }

    /// Overrides the AEAD used to encrypt payloads under the data key
    pub fn with_crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Builds the AwsKeyManagementService, loading AWS configuration for
    /// each region from the environment
    pub fn build(self) -> Result<AwsKeyManagementService> {
        if self.region_arns.is_empty() {
            return Err(Error::Config(
                "at least one region/ARN pair is required".to_string(),
            ));
        }

        let preferred = self
            .preferred_region
            .ok_or_else(|| Error::Config("preferred region is required".to_string()))?;
        if !self.region_arns.iter().any(|(region, _)| *region == preferred) {
            return Err(Error::Config(format!(
                "preferred region {preferred} has no configured ARN"
            )));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Kms(format!("failed to start runtime: {e}")))?;

        // Preferred region first; envelope decryption walks this order.
        let mut ordered = self.region_arns;
        ordered.sort_by_key(|(region, _)| *region != preferred);

        let clients = ordered
            .into_iter()
            .map(|(region, arn)| {
                let config = runtime.block_on(
                    aws_config::from_env()
                        .region(Region::new(region.clone()))
                        .load(),
                );
                RegionalClient {
                    client: Client::new(&config),
                    region,
                    master_key_arn: arn,
                }
            })
            .collect();

        Ok(AwsKeyManagementService {
            clients,
            crypto: self
                .crypto
                .unwrap_or_else(|| Arc::new(crate::crypto::Aes256GcmAead::new())),
            runtime,
        })
    }
}

fn envelope_to_bytes(encrypted_key: &[u8], keks: &[RegionalKek]) -> Result<Vec<u8>> {
    let value = json!({
        "encryptedKey": BASE64.encode(encrypted_key),
        "kmsKeks": keks
            .iter()
            .map(|kek| {
                json!({
                    "region": kek.region,
                    "arn": kek.arn,
                    "encryptedKek": BASE64.encode(&kek.encrypted_kek),
                })
            })
            .collect::<Vec<_>>(),
    });

    serde_json::to_vec(&value).map_err(|e| Error::Kms(format!("envelope serialization failed: {e}")))
}

fn envelope_from_bytes(bytes: &[u8]) -> Result<(Vec<u8>, Vec<RegionalKek>)> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::Kms(format!("invalid KMS envelope: {e}")))?;

    let encrypted_key = value
        .get("encryptedKey")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Kms("KMS envelope is missing encryptedKey".to_string()))
        .and_then(|encoded| {
            BASE64
                .decode(encoded)
                .map_err(|e| Error::Kms(format!("invalid encryptedKey: {e}")))
        })?;

    let keks = value
        .get("kmsKeks")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Kms("KMS envelope is missing kmsKeks".to_string()))?
        .iter()
        .map(|entry| {
            let field = |name: &str| {
                entry
                    .get(name)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::Kms(format!("KMS KEK entry is missing {name}")))
            };
            Ok(RegionalKek {
                region: field("region")?,
                arn: field("arn")?,
                encrypted_kek: BASE64
                    .decode(field("encryptedKek")?)
                    .map_err(|e| Error::Kms(format!("invalid encryptedKek: {e}")))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((encrypted_key, keks))
}
