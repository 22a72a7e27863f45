use chrono::Utc;
use std::fmt;
use std::time::Duration;

/// Default values for crypto policies
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(60 * 60 * 24 * 90); // 90 days
pub const DEFAULT_REVOKED_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60); // 60 minutes
pub const DEFAULT_CREATE_DATE_PRECISION: Duration = Duration::from_secs(60); // 1 minute
pub const DEFAULT_SESSION_CACHE_MAX_SIZE: usize = 1000;
pub const DEFAULT_SESSION_CACHE_DURATION: Duration = Duration::from_millis(120_000); // 2 minutes

/// How an expired key gets replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// The next access that finds the key expired creates a new one
    Inline,
    /// An out-of-band process rotates keys; expired keys keep being served until it does
    Queued,
}

/// The level of the key hierarchy a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Keys wrapped by the KMS master key
    System,
    /// Keys wrapped by a system key
    Intermediate,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::System => write!(f, "system"),
            KeyType::Intermediate => write!(f, "intermediate"),
        }
    }
}

/// Decisions about key lifetime, caching and rotation
pub trait CryptoPolicy: Send + Sync + fmt::Debug {
    /// Whether a key created at `created` (unix seconds) is past its lifetime
    fn is_key_expired(&self, created: i64) -> bool;

    /// How long a cached key is trusted before it must be revalidated against the metastore
    fn revoke_check_period(&self) -> Duration;

    /// Whether unwrapped system keys may be cached
    fn can_cache_system_keys(&self) -> bool;

    /// Whether unwrapped intermediate keys may be cached
    fn can_cache_intermediate_keys(&self) -> bool;

    /// Whether per-partition sessions may be cached
    fn can_cache_sessions(&self) -> bool;

    /// Maximum number of cached sessions
    fn session_cache_max_size(&self) -> usize;

    /// How long an unreferenced session stays cached
    fn session_cache_ttl(&self) -> Duration;

    /// How expired keys get replaced
    fn rotation_strategy(&self) -> RotationStrategy;

    /// Whether reading an expired key of this type should be reported
    fn notify_expired_on_read(&self, key_type: KeyType) -> bool;

    /// Granularity of new key timestamps
    fn create_date_precision(&self) -> Duration {
        DEFAULT_CREATE_DATE_PRECISION
    }

    /// Creation timestamp for a key generated now
    fn new_key_timestamp(&self) -> i64 {
        new_key_timestamp(self.create_date_precision())
    }

    /// Whether expired keys are replaced on access
    fn is_inline_key_rotation(&self) -> bool {
        self.rotation_strategy() == RotationStrategy::Inline
    }
}

/// Policy where keys expire a fixed time after creation and cached keys are revalidated
/// on a fixed cadence.
///
/// # Example
/// ```
/// use rowcrypt::policy::{BasicExpiringCryptoPolicy, CryptoPolicy, RotationStrategy};
/// use std::time::Duration;
///
/// let policy = BasicExpiringCryptoPolicy::from_days_and_minutes(30, 15)
///     .with_rotation_strategy(RotationStrategy::Queued)
///     .with_session_cache(true)
///     .with_session_cache_duration(Duration::from_secs(60 * 60));
///
/// assert_eq!(policy.revoke_check_period(), Duration::from_secs(15 * 60));
/// assert!(policy.can_cache_sessions());
/// ```
#[derive(Debug, Clone)]
pub struct BasicExpiringCryptoPolicy {
    expire_key_after: Duration,
    revoke_check_interval: Duration,
    create_date_precision: Duration,
    rotation_strategy: RotationStrategy,
    cache_system_keys: bool,
    cache_intermediate_keys: bool,
    cache_sessions: bool,
    session_cache_max_size: usize,
    session_cache_duration: Duration,
    notify_expired_system_key_on_read: bool,
    notify_expired_intermediate_key_on_read: bool,
}

impl Default for BasicExpiringCryptoPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRE_AFTER, DEFAULT_REVOKED_CHECK_INTERVAL)
    }
}

impl BasicExpiringCryptoPolicy {
    /// Creates a policy with the given key lifetime and revocation check interval; every
    /// other setting takes its default.
    pub fn new(expire_key_after: Duration, revoke_check_interval: Duration) -> Self {
        Self {
            expire_key_after,
            revoke_check_interval,
            create_date_precision: DEFAULT_CREATE_DATE_PRECISION,
            rotation_strategy: RotationStrategy::Inline,
            cache_system_keys: true,
            cache_intermediate_keys: true,
            cache_sessions: false,
            session_cache_max_size: DEFAULT_SESSION_CACHE_MAX_SIZE,
            session_cache_duration: DEFAULT_SESSION_CACHE_DURATION,
            notify_expired_system_key_on_read: false,
            notify_expired_intermediate_key_on_read: false,
        }
    }

    /// Creates a policy from a key lifetime in days and a revocation check interval in
    /// minutes
    pub fn from_days_and_minutes(expiration_days: u64, revoke_check_minutes: u64) -> Self {
        Self::new(
            Duration::from_secs(expiration_days * 24 * 60 * 60),
            Duration::from_secs(revoke_check_minutes * 60),
        )
    }

    /// Sets the key rotation strategy
    pub fn with_rotation_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.rotation_strategy = strategy;
        self
    }

    /// Enables or disables system key caching
    pub fn with_system_key_cache(mut self, enabled: bool) -> Self {
        self.cache_system_keys = enabled;
        self
    }

    /// Enables or disables intermediate key caching
    pub fn with_intermediate_key_cache(mut self, enabled: bool) -> Self {
        self.cache_intermediate_keys = enabled;
        self
    }

    /// Disables caching of both system and intermediate keys
    pub fn with_no_cache(mut self) -> Self {
        self.cache_system_keys = false;
        self.cache_intermediate_keys = false;
        self
    }

    /// Enables or disables session caching
    pub fn with_session_cache(mut self, enabled: bool) -> Self {
        self.cache_sessions = enabled;
        self
    }

    /// Sets the session cache max size
    pub fn with_session_cache_max_size(mut self, size: usize) -> Self {
        self.session_cache_max_size = size;
        self
    }

    /// Sets how long an unreferenced session stays cached
    pub fn with_session_cache_duration(mut self, duration: Duration) -> Self {
        self.session_cache_duration = duration;
        self
    }

    /// Reports reads of expired system keys
    pub fn with_notify_expired_system_key_on_read(mut self, notify: bool) -> Self {
        self.notify_expired_system_key_on_read = notify;
        self
    }

    /// Reports reads of expired intermediate keys
    pub fn with_notify_expired_intermediate_key_on_read(mut self, notify: bool) -> Self {
        self.notify_expired_intermediate_key_on_read = notify;
        self
    }

    /// Sets the create date precision for new key timestamps
    ///
    /// Keys created by concurrent callers within the same window share a timestamp, which
    /// is what lets the metastore's uniqueness check settle creation races.
    /// Default is 1 minute.
    pub fn with_create_date_precision(mut self, duration: Duration) -> Self {
        self.create_date_precision = duration;
        self
    }

    /// The configured key lifetime
    pub fn expire_key_after(&self) -> Duration {
        self.expire_key_after
    }
}

impl CryptoPolicy for BasicExpiringCryptoPolicy {
    fn is_key_expired(&self, created: i64) -> bool {
        is_key_expired(created, self.expire_key_after)
    }

    fn revoke_check_period(&self) -> Duration {
        self.revoke_check_interval
    }

    fn can_cache_system_keys(&self) -> bool {
        self.cache_system_keys
    }

    fn can_cache_intermediate_keys(&self) -> bool {
        self.cache_intermediate_keys
    }

    fn can_cache_sessions(&self) -> bool {
        self.cache_sessions
    }

    fn session_cache_max_size(&self) -> usize {
        self.session_cache_max_size
    }

    fn session_cache_ttl(&self) -> Duration {
        self.session_cache_duration
    }

    fn rotation_strategy(&self) -> RotationStrategy {
        self.rotation_strategy
    }

    fn notify_expired_on_read(&self, key_type: KeyType) -> bool {
        match key_type {
            KeyType::System => self.notify_expired_system_key_on_read,
            KeyType::Intermediate => self.notify_expired_intermediate_key_on_read,
        }
    }

    fn create_date_precision(&self) -> Duration {
        self.create_date_precision
    }
}

/// Policy where keys never expire and cached keys are never revalidated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpiredCryptoPolicy;

impl CryptoPolicy for NeverExpiredCryptoPolicy {
    fn is_key_expired(&self, _created: i64) -> bool {
        false
    }

    fn revoke_check_period(&self) -> Duration {
        Duration::MAX
    }

    fn can_cache_system_keys(&self) -> bool {
        true
    }

    fn can_cache_intermediate_keys(&self) -> bool {
        true
    }

    fn can_cache_sessions(&self) -> bool {
        false
    }

    fn session_cache_max_size(&self) -> usize {
        usize::MAX
    }

    fn session_cache_ttl(&self) -> Duration {
        Duration::MAX
    }

    fn rotation_strategy(&self) -> RotationStrategy {
        RotationStrategy::Inline
    }

    fn notify_expired_on_read(&self, _key_type: KeyType) -> bool {
        true
    }
}

/// Current unix time in seconds
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Returns the current unix time truncated to the given precision
pub fn new_key_timestamp(precision: Duration) -> i64 {
    let now = now_unix();
    let step = i64::try_from(precision.as_secs()).unwrap_or(i64::MAX);
    if step > 1 {
        now - now.rem_euclid(step)
    } else {
        now
    }
}

/// Checks if a key with the given creation timestamp is expired
///
/// A key is expired once `now - created >= expire_after`.
pub fn is_key_expired(created: i64, expire_after: Duration) -> bool {
    let lifetime = i64::try_from(expire_after.as_secs()).unwrap_or(i64::MAX);
    now_unix().saturating_sub(created) >= lifetime
}
