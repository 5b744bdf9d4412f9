use thiserror::Error;

/// Result type for asherah operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the asherah library
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration option is invalid or a required value is missing;
    /// surfaced at factory build time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The host OS denied a secure-memory operation (mlock quota,
    /// allocation failure)
    #[error("secure memory error: {0}")]
    SecureMemory(#[from] securemem::SecretError),

    /// The AEAD primitive reported a tag mismatch or internal failure;
    /// fatal for the affected record
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A master-key operation failed in all configured regions
    #[error("KMS error: {0}")]
    Kms(String),

    /// Non-retryable I/O error surfaced from the metastore backend
    #[error("metastore error: {0}")]
    Metastore(String),

    /// A referenced key record is missing from the metastore
    #[error("key not found: {0}")]
    NotFound(String),

    /// A key record is structurally unusable (missing parent metadata,
    /// undecodable key bytes)
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A key cache was used after close
    #[error("cache is closed")]
    CacheClosed,

    /// A caller-supplied argument is invalid
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
