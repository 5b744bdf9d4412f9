//! DynamoDB metastore implementation
//!
//! Table layout: partition key `Id` (S), sort key `Created` (N, unix
//! seconds), attribute `KeyRecord` (M). The at-most-once store contract is
//! provided by a conditional put on `attribute_not_exists(Id)`, and reads are
//! strongly consistent. The `Metastore` surface is synchronous; requests run
//! on a privately owned tokio runtime.

use crate::envelope::{EnvelopeKeyRecord, KeyMeta};
use crate::error::{Error, Result};
use crate::metrics::Timer;
use crate::Metastore;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;

const DEFAULT_TABLE_NAME: &str = "EncryptionKey";

const PARTITION_KEY: &str = "Id";
const SORT_KEY: &str = "Created";
const KEY_RECORD: &str = "KeyRecord";

/// DynamoDB metastore implementation
pub struct DynamoDbMetastore {
    client: Client,
    table_name: String,
    region_suffix: Option<String>,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for DynamoDbMetastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbMetastore")
            .field("table_name", &self.table_name)
            .field("region_suffix", &self.region_suffix)
            .finish()
    }
}

impl DynamoDbMetastore {
    /// Creates a builder for DynamoDbMetastore
    pub fn builder() -> DynamoDbMetastoreBuilder {
        DynamoDbMetastoreBuilder::default()
    }

    /// Returns the region suffix, if enabled
    pub fn region_suffix(&self) -> Option<&str> {
        self.region_suffix.as_deref()
    }

    fn effective_id(&self, id: &str) -> String {
        match &self.region_suffix {
            Some(suffix) => format!("{id}_{suffix}"),
            None => id.to_string(),
        }
    }
}

impl Metastore for DynamoDbMetastore {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let _timer = Timer::start("ael.metastore.dynamodb.load");

        let output = self
            .runtime
            .block_on(
                self.client
                    .get_item()
                    .table_name(&self.table_name)
                    .key(PARTITION_KEY, AttributeValue::S(self.effective_id(id)))
                    .key(SORT_KEY, AttributeValue::N(created.to_string()))
                    .consistent_read(true)
                    .send(),
            )
            .map_err(|e| Error::Metastore(format!("get item failed: {e}")))?;

        output
            .item()
            .map(record_from_item)
            .transpose()
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let _timer = Timer::start("ael.metastore.dynamodb.loadlatest");

        let output = self
            .runtime
            .block_on(
                self.client
                    .query()
                    .table_name(&self.table_name)
                    .key_condition_expression("#id = :id")
                    .expression_attribute_names("#id", PARTITION_KEY)
                    .expression_attribute_values(
                        ":id",
                        AttributeValue::S(self.effective_id(id)),
                    )
                    .scan_index_forward(false)
                    .limit(1)
                    .consistent_read(true)
                    .send(),
            )
            .map_err(|e| Error::Metastore(format!("query failed: {e}")))?;

        output
            .items()
            .and_then(|items| items.first())
            .map(record_from_item)
            .transpose()
    }

    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
        let _timer = Timer::start("ael.metastore.dynamodb.store");

        if record.encrypted_key.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot store a record with empty key material".to_string(),
            ));
        }

        let result = self.runtime.block_on(
            self.client
                .put_item()
                .table_name(&self.table_name)
                .item(PARTITION_KEY, AttributeValue::S(self.effective_id(id)))
                .item(SORT_KEY, AttributeValue::N(created.to_string()))
                .item(KEY_RECORD, record_to_attribute(record))
                .condition_expression("attribute_not_exists(Id)")
                .send(),
        );

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                // The conditional check firing means another writer won the
                // create race, which is not an error under the store
                // contract.
                if service_error.is_conditional_check_failed_exception() {
                    Ok(false)
                } else {
                    Err(Error::Metastore(format!("put item failed: {service_error}")))
                }
            }
        }
    }
}

/// Builder for DynamoDbMetastore
#[derive(Debug, Default)]
pub struct DynamoDbMetastoreBuilder {
    table_name: Option<String>,
    region: Option<String>,
    region_suffix: bool,
}

impl DynamoDbMetastoreBuilder {
    /// Sets the table name; defaults to `EncryptionKey`
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Sets the AWS region; defaults to the environment's region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Enables the region suffix for multi-region replicated tables
    pub fn with_region_suffix(mut self, enabled: bool) -> Self {
        self.region_suffix = enabled;
        self
    }

    /// Builds the DynamoDbMetastore, loading AWS configuration from the
    /// environment
    pub fn build(self) -> Result<DynamoDbMetastore> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Metastore(format!("failed to start runtime: {e}")))?;

        let mut loader = aws_config::from_env();
        if let Some(region) = self.region.clone() {
            loader = loader.region(Region::new(region));
        }
        let config = runtime.block_on(loader.load());

        let region_suffix = if self.region_suffix {
            let region = self
                .region
                .or_else(|| config.region().map(|r| r.to_string()))
                .ok_or_else(|| {
                    Error::Config(
                        "region suffix requires a resolvable AWS region".to_string(),
                    )
                })?;
            Some(region)
        } else {
            None
        };

        Ok(DynamoDbMetastore {
            client: Client::new(&config),
            table_name: self
                .table_name
                .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            region_suffix,
            runtime,
        })
    }
}

fn record_to_attribute(record: &EnvelopeKeyRecord) -> AttributeValue {
    let mut map = HashMap::new();
    map.insert(
        "Key".to_string(),
        AttributeValue::S(BASE64.encode(&record.encrypted_key)),
    );
    map.insert(
        "Created".to_string(),
        AttributeValue::N(record.created.to_string()),
    );
    if let Some(revoked) = record.revoked {
        map.insert("Revoked".to_string(), AttributeValue::Bool(revoked));
    }
    if let Some(parent) = &record.parent_key_meta {
        let mut parent_map = HashMap::new();
        parent_map.insert(
            "KeyId".to_string(),
            AttributeValue::S(parent.id.clone()),
        );
        parent_map.insert(
            "Created".to_string(),
            AttributeValue::N(parent.created.to_string()),
        );
        map.insert("ParentKeyMeta".to_string(), AttributeValue::M(parent_map));
    }
    AttributeValue::M(map)
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Result<EnvelopeKeyRecord> {
    let record = item
        .get(KEY_RECORD)
        .and_then(|v| v.as_m().ok())
        .ok_or_else(|| Error::Metastore("item has no KeyRecord map".to_string()))?;

    let encrypted_key = record
        .get("Key")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| Error::Metastore("KeyRecord has no Key".to_string()))
        .and_then(|encoded| {
            BASE64
                .decode(encoded)
                .map_err(|e| Error::Metastore(format!("Key is not valid base64: {e}")))
        })?;

    let created = parse_n(record.get("Created"), "Created")?;

    let revoked = record
        .get("Revoked")
        .and_then(|v| v.as_bool().ok())
        .copied();

    let parent_key_meta = record
        .get("ParentKeyMeta")
        .and_then(|v| v.as_m().ok())
        .map(|parent| {
            let id = parent
                .get("KeyId")
                .and_then(|v| v.as_s().ok())
                .ok_or_else(|| Error::Metastore("ParentKeyMeta has no KeyId".to_string()))?;
            Ok::<_, Error>(KeyMeta::new(id.clone(), parse_n(parent.get("Created"), "Created")?))
        })
        .transpose()?;

    Ok(EnvelopeKeyRecord {
        created,
        encrypted_key,
        parent_key_meta,
        revoked,
    })
}

fn parse_n(value: Option<&AttributeValue>, field: &str) -> Result<i64> {
    value
        .and_then(|v| v.as_n().ok())
        .ok_or_else(|| Error::Metastore(format!("missing numeric attribute {field}")))?
        .parse::<i64>()
        .map_err(|e| Error::Metastore(format!("invalid {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_attribute_round_trips() {
        let record = EnvelopeKeyRecord {
            created: 1_700_000_040,
            encrypted_key: vec![1, 2, 3, 4],
            parent_key_meta: Some(KeyMeta::new("_SK_svc_prod", 1_699_999_980)),
            revoked: Some(true),
        };

        let mut item = HashMap::new();
        item.insert(KEY_RECORD.to_string(), record_to_attribute(&record));

        let parsed = record_from_item(&item).expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let record = EnvelopeKeyRecord {
            created: 1_700_000_040,
            encrypted_key: vec![1],
            parent_key_meta: None,
            revoked: None,
        };

        let attribute = record_to_attribute(&record);
        let map = attribute.as_m().expect("map");
        assert!(!map.contains_key("Revoked"));
        assert!(!map.contains_key("ParentKeyMeta"));

        let mut item = HashMap::new();
        item.insert(KEY_RECORD.to_string(), attribute.clone());
        let parsed = record_from_item(&item).expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn malformed_items_are_rejected() {
        assert!(record_from_item(&HashMap::new()).is_err());

        let mut bad = HashMap::new();
        let mut map = HashMap::new();
        map.insert("Key".to_string(), AttributeValue::S("!!!".to_string()));
        map.insert("Created".to_string(), AttributeValue::N("1".to_string()));
        bad.insert(KEY_RECORD.to_string(), AttributeValue::M(map));
        assert!(record_from_item(&bad).is_err());
    }
}
