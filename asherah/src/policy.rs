use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;

/// Default values for CryptoPolicy
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(60 * 60 * 24 * 90); // 90 days
pub const DEFAULT_REVOKE_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60); // 60 minutes
pub const DEFAULT_CREATE_DATE_PRECISION: Duration = Duration::from_secs(60); // 1 minute
pub const DEFAULT_SESSION_CACHE_MAX_SIZE: usize = 1000;
pub const DEFAULT_SESSION_CACHE_DURATION: Duration = Duration::from_secs(60 * 60 * 2); // 2 hours

/// How the engine reacts when the latest key for a partition has expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyRotationStrategy {
    /// Generate a replacement key inline, during the operation that noticed
    /// the expiry.
    #[default]
    Inline,

    /// Serve the expired key for reads and leave rotation to an external
    /// process. The core engine carries the flag but behaves as `Inline` for
    /// encrypt paths.
    Queued,
}

/// Policy for encryption key management
///
/// The default policy is the "basic expiring" configuration: keys expire
/// after 90 days, cached keys are re-verified against the metastore every
/// hour, and key timestamps are truncated to minute precision.
#[derive(Debug, Clone)]
pub struct CryptoPolicy {
    /// Time after which a key is considered expired
    pub expire_key_after: Duration,

    /// How long a cached, non-revoked key is trusted before the metastore is
    /// consulted again
    pub revoke_check_interval: Duration,

    /// Precision to use when creating new key timestamps
    pub create_date_precision: Duration,

    /// Whether to cache system keys
    pub cache_system_keys: bool,

    /// Whether to cache intermediate keys
    pub cache_intermediate_keys: bool,

    /// Whether to cache sessions
    pub cache_sessions: bool,

    /// Maximum size of the session cache
    pub session_cache_max_size: usize,

    /// How long sessions stay in the cache
    pub session_cache_duration: Duration,

    /// Report (log/metrics) when an expired system key is served for a read
    pub notify_expired_system_key_on_read: bool,

    /// Report (log/metrics) when an expired intermediate key is served for a
    /// read
    pub notify_expired_intermediate_key_on_read: bool,

    /// Rotation strategy for expired keys
    pub rotation_strategy: KeyRotationStrategy,
}

impl Default for CryptoPolicy {
    fn default() -> Self {
        Self {
            expire_key_after: DEFAULT_EXPIRE_AFTER,
            revoke_check_interval: DEFAULT_REVOKE_CHECK_INTERVAL,
            create_date_precision: DEFAULT_CREATE_DATE_PRECISION,
            cache_system_keys: true,
            cache_intermediate_keys: true,
            cache_sessions: false,
            session_cache_max_size: DEFAULT_SESSION_CACHE_MAX_SIZE,
            session_cache_duration: DEFAULT_SESSION_CACHE_DURATION,
            notify_expired_system_key_on_read: false,
            notify_expired_intermediate_key_on_read: false,
            rotation_strategy: KeyRotationStrategy::Inline,
        }
    }
}

impl CryptoPolicy {
    /// Creates a new CryptoPolicy with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy whose keys never expire and are never re-verified.
    ///
    /// Useful for tests that need stable keys; not intended for production.
    pub fn never_expiring() -> Self {
        Self {
            expire_key_after: Duration::ZERO,
            revoke_check_interval: Duration::from_secs(60 * 60 * 24 * 365),
            ..Self::default()
        }
    }

    /// Sets the expire after duration
    pub fn with_expire_after(mut self, duration: Duration) -> Self {
        self.expire_key_after = duration;
        self
    }

    /// Sets the revoke check interval
    pub fn with_revoke_check_interval(mut self, duration: Duration) -> Self {
        self.revoke_check_interval = duration;
        self
    }

    /// Sets the create date precision for new key timestamps
    pub fn with_create_date_precision(mut self, duration: Duration) -> Self {
        self.create_date_precision = duration;
        self
    }

    /// Disables caching of both system and intermediate keys
    pub fn with_no_cache(mut self) -> Self {
        self.cache_system_keys = false;
        self.cache_intermediate_keys = false;
        self
    }

    /// Enables session caching
    pub fn with_session_cache(mut self) -> Self {
        self.cache_sessions = true;
        self
    }

    /// Sets the session cache max size
    pub fn with_session_cache_max_size(mut self, size: usize) -> Self {
        self.session_cache_max_size = size;
        self
    }

    /// Sets the session cache duration
    pub fn with_session_cache_duration(mut self, duration: Duration) -> Self {
        self.session_cache_duration = duration;
        self
    }

    /// Sets the rotation strategy
    pub fn with_rotation_strategy(mut self, strategy: KeyRotationStrategy) -> Self {
        self.rotation_strategy = strategy;
        self
    }

    /// Checks if a key created at the given timestamp is expired under this
    /// policy
    pub fn is_key_expired(&self, created: i64) -> bool {
        is_key_expired(created, self.expire_key_after)
    }

    /// The revoke check interval in milliseconds
    pub fn revoke_check_millis(&self) -> i64 {
        self.revoke_check_interval.as_millis() as i64
    }

    /// Truncates a timestamp to system key precision
    pub fn truncate_to_system_key_precision(&self, timestamp: i64) -> i64 {
        truncate_timestamp(timestamp, self.create_date_precision)
    }

    /// Truncates a timestamp to intermediate key precision
    pub fn truncate_to_intermediate_key_precision(&self, timestamp: i64) -> i64 {
        truncate_timestamp(timestamp, self.create_date_precision)
    }
}

/// Returns the current unix timestamp truncated to the given precision
pub fn new_key_timestamp(truncate: Duration) -> i64 {
    truncate_timestamp(Utc::now().timestamp(), truncate)
}

/// Truncates a unix timestamp to the given precision
pub fn truncate_timestamp(timestamp: i64, truncate: Duration) -> i64 {
    let step = truncate.as_secs() as i64;
    if step > 0 {
        timestamp - timestamp.rem_euclid(step)
    } else {
        timestamp
    }
}

/// Checks if a key with the given creation timestamp is expired
///
/// A zero `expire_after` means keys never expire.
pub fn is_key_expired(created: i64, expire_after: Duration) -> bool {
    if expire_after.as_secs() == 0 {
        return false;
    }

    let created_at = match Utc.timestamp_opt(created, 0) {
        chrono::LocalResult::Single(dt) => dt,
        _ => return false,
    };
    let expires_at = created_at + ChronoDuration::seconds(expire_after.as_secs() as i64);

    Utc::now() > expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_minute_aligned() {
        // 2023-11-14T22:13:20Z
        assert_eq!(truncate_timestamp(1_700_000_000, Duration::from_secs(60)), 1_699_999_980);
        assert_eq!(
            truncate_timestamp(1_699_999_980, Duration::from_secs(60)),
            1_699_999_980
        );
        assert_eq!(truncate_timestamp(1_700_000_000, Duration::ZERO), 1_700_000_000);
    }

    #[test]
    fn new_key_timestamp_matches_precision() {
        let ts = new_key_timestamp(DEFAULT_CREATE_DATE_PRECISION);
        assert_eq!(ts % 60, 0);
        assert!((Utc::now().timestamp() - ts) < 60);
    }

    #[test]
    fn expiry_honors_duration() {
        let now = Utc::now().timestamp();
        assert!(!is_key_expired(now, Duration::from_secs(60)));
        assert!(is_key_expired(now - 120, Duration::from_secs(60)));

        // Zero means never expires.
        assert!(!is_key_expired(now - 120, Duration::ZERO));
        assert!(!CryptoPolicy::never_expiring().is_key_expired(0));
    }

    #[test]
    fn policy_truncation_helpers_share_precision() {
        let policy = CryptoPolicy::new();
        assert_eq!(
            policy.truncate_to_system_key_precision(1_700_000_000),
            policy.truncate_to_intermediate_key_precision(1_700_000_000)
        );
    }
}
