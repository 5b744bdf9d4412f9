use thiserror::Error;

/// Errors raised while allocating or operating on locked memory.
#[derive(Error, Debug)]
pub enum SecretError {
    /// The host refused the allocation (mmap failure or address-space
    /// exhaustion).
    #[error("failed to allocate secure memory: {0}")]
    AllocationFailed(String),

    /// The pages could not be pinned into RAM, commonly an RLIMIT_MEMLOCK
    /// quota problem.
    #[error("failed to lock memory: {0}")]
    LockFailed(String),

    /// mprotect rejected a protection change.
    #[error("failed to set memory protection: {0}")]
    ProtectionFailed(String),

    /// A zero or otherwise unusable size was requested.
    #[error("invalid size: {0}")]
    InvalidSize(String),

    /// Any other OS-level failure.
    #[error("OS error: {0}")]
    OsError(String),
}

/// Result type for securemem operations.
pub type Result<T> = std::result::Result<T, SecretError>;
