//! MySQL metastore implementation
//!
//! Stores envelope key records in an `encryption_key` table with PRIMARY KEY
//! `(id, created)`; the duplicate-key failure of a plain INSERT provides the
//! at-most-once store contract. The `Metastore` surface is synchronous;
//! queries run on a privately owned tokio runtime.

use crate::envelope::EnvelopeKeyRecord;
use crate::error::{Error, Result};
use crate::metrics::Timer;
use crate::Metastore;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::mysql::{MySql, MySqlPoolOptions};
use sqlx::Pool;

const LOAD_KEY_QUERY: &str = "SELECT key_record FROM encryption_key WHERE id = ? AND created = ?";
const LOAD_LATEST_QUERY: &str =
    "SELECT key_record FROM encryption_key WHERE id = ? ORDER BY created DESC LIMIT 1";
const STORE_KEY_QUERY: &str =
    "INSERT INTO encryption_key (id, created, key_record) VALUES (?, ?, ?)";

/// MySQL metastore implementation
#[derive(Debug)]
pub struct MySqlMetastore {
    pool: Pool<MySql>,
    runtime: tokio::runtime::Runtime,
}

impl MySqlMetastore {
    /// Creates a metastore connected to the given MySQL URL
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Metastore(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(MySqlPoolOptions::new().connect(url))
            .map_err(|e| Error::Metastore(format!("connection failed: {e}")))?;

        Ok(Self { pool, runtime })
    }

    fn created_at(created: i64) -> Result<DateTime<Utc>> {
        Utc.timestamp_opt(created, 0)
            .single()
            .ok_or_else(|| Error::Metastore(format!("invalid timestamp {created}")))
    }

    fn parse_record(json: &str) -> Result<EnvelopeKeyRecord> {
        EnvelopeKeyRecord::from_json_bytes(json.as_bytes())
            .map_err(|e| Error::Metastore(format!("unreadable key record: {e}")))
    }
}

impl Metastore for MySqlMetastore {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let _timer = Timer::start("ael.metastore.sql.load");

        let row: Option<(String,)> = self
            .runtime
            .block_on(
                sqlx::query_as(LOAD_KEY_QUERY)
                    .bind(id)
                    .bind(Self::created_at(created)?)
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| Error::Metastore(format!("load failed: {e}")))?;

        row.map(|(json,)| Self::parse_record(&json)).transpose()
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let _timer = Timer::start("ael.metastore.sql.loadlatest");

        let row: Option<(String,)> = self
            .runtime
            .block_on(
                sqlx::query_as(LOAD_LATEST_QUERY)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| Error::Metastore(format!("load latest failed: {e}")))?;

        row.map(|(json,)| Self::parse_record(&json)).transpose()
    }

    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
        let _timer = Timer::start("ael.metastore.sql.store");

        if record.encrypted_key.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot store a record with empty key material".to_string(),
            ));
        }

        let json = String::from_utf8(record.to_json_bytes()?)
            .map_err(|e| Error::Metastore(format!("key record is not UTF-8: {e}")))?;

        let result = self.runtime.block_on(
            sqlx::query(STORE_KEY_QUERY)
                .bind(id)
                .bind(Self::created_at(created)?)
                .bind(json)
                .execute(&self.pool),
        );

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // The unique constraint firing means another writer won the
            // create race, which is not an error under the store contract.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(Error::Metastore(format!("store failed: {e}"))),
        }
    }
}
