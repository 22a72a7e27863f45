use crate::error::{Error, Result};
use crate::key::{CryptoKey, SharedCryptoKey};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeBounds;
use std::time::{Duration, Instant};

/// Entry in the key cache
struct CacheEntry {
    key: SharedCryptoKey,

    /// Last time the metastore confirmed this key
    validated_at: Mutex<Instant>,
}

impl CacheEntry {
    fn new(key: SharedCryptoKey) -> Self {
        Self {
            key,
            validated_at: Mutex::new(Instant::now()),
        }
    }

    fn revalidate(&self, now: Instant) {
        let mut validated_at = self.validated_at.lock();
        if now > *validated_at {
            *validated_at = now;
        }
    }
}

struct Inner<K> {
    entries: BTreeMap<K, CacheEntry>,
    closed: bool,
}

/// Cache of unwrapped keys
///
/// A cached key is handed out only while it is unrevoked and was validated against the
/// metastore less than `revoke_check_period` ago; otherwise the caller is expected to
/// reload it and put it back, which refreshes the entry. The cache owns the keys: they
/// are wiped when it is disposed, even if handles are still held elsewhere.
pub struct SecureKeyCache<K> {
    name: &'static str,
    revoke_check_period: Duration,
    inner: RwLock<Inner<K>>,
}

impl<K: Ord + Clone + fmt::Debug> fmt::Debug for SecureKeyCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SecureKeyCache")
            .field("name", &self.name)
            .field("revoke_check_period", &self.revoke_check_period)
            .field("keys", &inner.entries.keys().collect::<Vec<_>>())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<K: Ord + Clone + fmt::Debug> SecureKeyCache<K> {
    /// Creates an empty cache. `name` only shows up in logs and errors.
    pub fn new(name: &'static str, revoke_check_period: Duration) -> Self {
        Self {
            name,
            revoke_check_period,
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        if entry.key.is_revoked() {
            return false;
        }

        let validated_at = *entry.validated_at.lock();
        now.saturating_duration_since(validated_at) < self.revoke_check_period
    }

    fn fresh_key(&self, id: &K, entry: &CacheEntry) -> Option<SharedCryptoKey> {
        if self.is_fresh(entry, Instant::now()) {
            return Some(entry.key.clone());
        }

        log::debug!("{} cache stale -- id: {:?}", self.name, id);
        None
    }

    fn closed_error(&self) -> Error {
        Error::CacheClosed(format!("{} key cache", self.name))
    }

    /// Returns the cached key for `id` if it is still fresh
    pub fn get(&self, id: &K) -> Result<Option<SharedCryptoKey>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(self.closed_error());
        }

        Ok(inner.entries.get(id).and_then(|entry| self.fresh_key(id, entry)))
    }

    /// Returns the entry with the greatest id if it is still fresh
    pub fn get_latest(&self) -> Result<Option<SharedCryptoKey>> {
        self.get_latest_in(..)
    }

    /// Returns the entry with the greatest id inside `range` if it is still fresh
    ///
    /// A stale latest entry yields `None` rather than falling back to an older key.
    pub fn get_latest_in<R: RangeBounds<K>>(&self, range: R) -> Result<Option<SharedCryptoKey>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(self.closed_error());
        }

        Ok(inner
            .entries
            .range(range)
            .next_back()
            .and_then(|(id, entry)| self.fresh_key(id, entry)))
    }

    /// Caches `key` under `id` unless another key got there first, and returns the cached
    /// handle either way.
    ///
    /// When `key` loses, it is wiped. Its revoked flag is carried over to the cached key,
    /// and an unrevoked loser counts as a fresh validation of the cached one.
    pub fn put_if_absent_and_get_shared(&self, id: K, key: CryptoKey) -> Result<SharedCryptoKey> {
        let mut inner = self.inner.write();
        if inner.closed {
            drop(inner);
            self.discard(&id, key);
            return Err(self.closed_error());
        }

        if let Some(entry) = inner.entries.get(&id) {
            if key.is_revoked() {
                entry.key.set_revoked(true);
            } else {
                entry.revalidate(Instant::now());
            }

            let cached = entry.key.clone();
            drop(inner);

            log::debug!("{} cache already has {:?}, discarding loaded copy", self.name, id);
            self.discard(&id, key);

            return Ok(cached);
        }

        let shared = SharedCryptoKey::new(key);
        inner.entries.insert(id, CacheEntry::new(shared.clone()));

        Ok(shared)
    }

    fn discard(&self, id: &K, key: CryptoKey) {
        if let Err(e) = key.close() {
            log::error!("{} cache failed to wipe discarded {:?}: {}", self.name, id, e);
        }
    }

    /// Wipes every cached key, including keys still held elsewhere. Later calls are no-ops;
    /// later reads and puts fail with [`Error::CacheClosed`].
    pub fn dispose(&self) {
        let entries = {
            let mut inner = self.inner.write();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };

        log::debug!("{} cache disposing {} keys", self.name, entries.len());

        for (id, entry) in entries {
            if let Err(e) = entry.key.wipe() {
                log::error!("{} cache failed to wipe {:?}: {}", self.name, id, e);
            }
        }
    }

    /// Whether [`SecureKeyCache::dispose`] has run
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the cache holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Drop for SecureKeyCache<K> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for (_, entry) in std::mem::take(&mut inner.entries) {
            if let Err(e) = entry.key.wipe() {
                log::error!("{} cache failed to wipe key on drop: {}", self.name, e);
            }
        }
        inner.closed = true;
    }
}
