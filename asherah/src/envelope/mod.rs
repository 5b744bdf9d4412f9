//! Envelope encryption types and wire codec
//!
//! This module contains the records produced by the hierarchical key model
//! (System Keys, Intermediate Keys, Data Row Keys) and a hand-written JSON
//! codec for them. The codec is deliberately field-for-field so the wire
//! format stays stable and interoperable with the other Asherah
//! implementations: PascalCase field names, key bytes as standard base64.

pub mod encryption;

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

pub use encryption::{EnvelopeEncryption, EnvelopeEncryptionBuilder};

/// Metadata identifying a key: the metastore primary-key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMeta {
    /// The key id
    pub id: String,

    /// Unix timestamp (seconds) when the key was created
    pub created: i64,
}

impl KeyMeta {
    /// Creates a new KeyMeta
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            created,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "KeyId": self.id,
            "Created": self.created,
        })
    }

    fn from_json(value: &Value) -> Result<Self> {
        let obj = as_object(value, "ParentKeyMeta")?;
        Ok(Self {
            id: get_string(obj, "KeyId")?,
            created: get_i64(obj, "Created")?,
        })
    }
}

/// Record containing an encrypted key and its lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeKeyRecord {
    /// Unix timestamp (seconds) when the key was created
    pub created: i64,

    /// The key material, encrypted under its parent (`ciphertext ‖ nonce`)
    pub encrypted_key: Vec<u8>,

    /// Metadata of the parent key; absent for system keys, whose parent is
    /// the KMS master key implicit in the ciphertext
    pub parent_key_meta: Option<KeyMeta>,

    /// Whether the key has been revoked
    pub revoked: Option<bool>,
}

impl EnvelopeKeyRecord {
    /// Returns true if the record is marked revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked.unwrap_or(false)
    }

    /// Serializes the record to its JSON wire form
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("Created".to_string(), json!(self.created));
        obj.insert("Key".to_string(), json!(BASE64.encode(&self.encrypted_key)));
        if let Some(parent) = &self.parent_key_meta {
            obj.insert("ParentKeyMeta".to_string(), parent.to_json());
        }
        if let Some(revoked) = self.revoked {
            obj.insert("Revoked".to_string(), json!(revoked));
        }
        Value::Object(obj)
    }

    /// Parses a record from its JSON wire form
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = as_object(value, "key record")?;
        Ok(Self {
            created: get_i64(obj, "Created")?,
            encrypted_key: get_base64(obj, "Key")?,
            parent_key_meta: match obj.get("ParentKeyMeta") {
                Some(v) if !v.is_null() => Some(KeyMeta::from_json(v)?),
                _ => None,
            },
            revoked: match obj.get("Revoked") {
                Some(v) if !v.is_null() => Some(v.as_bool().ok_or_else(|| {
                    Error::MalformedEnvelope("Revoked is not a boolean".to_string())
                })?),
                _ => None,
            },
        })
    }

    /// Serializes the record to UTF-8 JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_json())
            .map_err(|e| Error::MalformedEnvelope(format!("serialization failed: {e}")))
    }

    /// Parses a record from UTF-8 JSON bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedEnvelope(format!("invalid JSON: {e}")))?;
        Self::from_json(&value)
    }
}

/// The self-describing encrypted payload the engine emits
///
/// Decryption requires only the metastore and the KMS: `key` is the data row
/// key's envelope (parent = intermediate key) and `data` is the payload
/// encrypted under the data row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRowRecord {
    /// The data row key's envelope
    pub key: EnvelopeKeyRecord,

    /// The payload, encrypted under the data row key (`ciphertext ‖ nonce`)
    pub data: Vec<u8>,
}

impl DataRowRecord {
    /// Serializes the record to its JSON wire form
    pub fn to_json(&self) -> Value {
        json!({
            "Data": BASE64.encode(&self.data),
            "Key": self.key.to_json(),
        })
    }

    /// Parses a record from its JSON wire form
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = as_object(value, "data row record")?;
        Ok(Self {
            data: get_base64(obj, "Data")?,
            key: EnvelopeKeyRecord::from_json(
                obj.get("Key")
                    .ok_or_else(|| Error::MalformedEnvelope("missing Key".to_string()))?,
            )?,
        })
    }

    /// Serializes the record to UTF-8 JSON bytes, the form byte-oriented
    /// callers treat as opaque
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_json())
            .map_err(|e| Error::MalformedEnvelope(format!("serialization failed: {e}")))
    }

    /// Parses a record from UTF-8 JSON bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedEnvelope(format!("invalid JSON: {e}")))?;
        Self::from_json(&value)
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::MalformedEnvelope(format!("{what} is not a JSON object")))
}

fn get_string(obj: &Map<String, Value>, field: &str) -> Result<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedEnvelope(format!("missing or invalid {field}")))
}

fn get_i64(obj: &Map<String, Value>, field: &str) -> Result<i64> {
    obj.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::MalformedEnvelope(format!("missing or invalid {field}")))
}

fn get_base64(obj: &Map<String, Value>, field: &str) -> Result<Vec<u8>> {
    let encoded = obj
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedEnvelope(format!("missing or invalid {field}")))?;
    BASE64
        .decode(encoded)
        .map_err(|e| Error::MalformedEnvelope(format!("{field} is not valid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_drr() -> DataRowRecord {
        DataRowRecord {
            key: EnvelopeKeyRecord {
                created: 1_700_000_040,
                encrypted_key: vec![1, 2, 3, 4],
                parent_key_meta: Some(KeyMeta::new("_IK_shopper-1_svc-a_prod-x", 1_700_000_040)),
                revoked: None,
            },
            data: vec![9, 8, 7],
        }
    }

    #[test]
    fn wire_format_uses_pascal_case_and_base64() {
        let value = sample_drr().to_json();

        assert_eq!(value["Data"], "CQgH");
        assert_eq!(value["Key"]["Created"], 1_700_000_040_i64);
        assert_eq!(value["Key"]["Key"], "AQIDBA==");
        assert_eq!(value["Key"]["ParentKeyMeta"]["KeyId"], "_IK_shopper-1_svc-a_prod-x");
        assert_eq!(value["Key"]["ParentKeyMeta"]["Created"], 1_700_000_040_i64);
        // Optional fields are omitted, not null.
        assert!(value["Key"].get("Revoked").is_none());
    }

    #[test]
    fn drr_round_trips_through_bytes() {
        let drr = sample_drr();
        let bytes = drr.to_json_bytes().expect("encode");
        let parsed = DataRowRecord::from_json_bytes(&bytes).expect("decode");
        assert_eq!(parsed, drr);
    }

    #[test]
    fn ekr_round_trips_with_revoked_flag() {
        let record = EnvelopeKeyRecord {
            created: 1_700_000_000,
            encrypted_key: vec![0xde, 0xad],
            parent_key_meta: None,
            revoked: Some(true),
        };

        let bytes = record.to_json_bytes().expect("encode");
        let parsed = EnvelopeKeyRecord::from_json_bytes(&bytes).expect("decode");
        assert_eq!(parsed, record);
        assert!(parsed.is_revoked());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            DataRowRecord::from_json_bytes(b"not json"),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            DataRowRecord::from_json(&json!({"Data": "CQgH"})),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            EnvelopeKeyRecord::from_json(&json!({"Created": 1, "Key": "!!!"})),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            EnvelopeKeyRecord::from_json(&json!({"Created": 1, "Key": "AQ==", "ParentKeyMeta": {"KeyId": 5}})),
            Err(Error::MalformedEnvelope(_))
        ));
    }
}
