//! Reuse of per-partition encryption contexts across sessions
//!
//! Each partition id maps to one shared [`Encryption`] plus a count of the sessions
//! currently holding it. When the count drops to zero the entry goes idle instead of being
//! torn down, so a partition that is used again soon keeps its warm intermediate key cache.
//! Idle entries leave the cache when their TTL runs out or when room is needed, and are
//! closed exactly once, by whichever thread removed them, after the cache lock is released.
//!
//! Eviction is driven by cache activity: expired entries are purged on every acquire and
//! by [`SessionCache::purge_expired`]. No background thread is involved.

use crate::error::{Error, Result};
use crate::metrics::increment_counter;
use crate::policy::CryptoPolicy;
use crate::Encryption;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    encryption: Arc<dyn Encryption>,
    refs: usize,
    /// Set while no session holds the entry
    idle_since: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    closed: bool,
}

type Evicted = Vec<(String, Arc<dyn Encryption>)>;

/// Bounded cache of shared encryption contexts keyed by partition id
#[derive(Debug)]
pub struct SessionCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

fn same_encryption(a: &Arc<dyn Encryption>, b: &Arc<dyn Encryption>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl SessionCache {
    /// Creates a cache holding at most `max_size` idle entries, each for at most `ttl`
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Creates a cache sized by the policy's session cache settings
    pub fn from_policy(policy: &dyn CryptoPolicy) -> Self {
        Self::new(policy.session_cache_max_size(), policy.session_cache_ttl())
    }

    /// Returns the shared context for `partition_id`, calling `create` if there is none,
    /// and counts the caller as a holder until [`SessionCache::release`].
    pub fn acquire<F>(&self, partition_id: &str, create: F) -> Result<Arc<dyn Encryption>>
    where
        F: FnOnce() -> Result<Arc<dyn Encryption>>,
    {
        let mut evicted = Evicted::new();

        let result = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::CacheClosed("session cache".into()));
            }

            self.purge_locked(&mut inner, Instant::now(), &mut evicted);

            if let Some(entry) = inner.entries.get_mut(partition_id) {
                entry.refs += 1;
                entry.idle_since = None;
                increment_counter("ael.session_cache.hit");

                Ok(Arc::clone(&entry.encryption))
            } else {
                increment_counter("ael.session_cache.miss");

                if inner.entries.len() >= self.max_size {
                    let needed = inner.entries.len() + 1 - self.max_size;
                    self.compact_locked(&mut inner, needed, &mut evicted);
                }

                create().map(|encryption| {
                    inner.entries.insert(
                        partition_id.to_string(),
                        Entry {
                            encryption: Arc::clone(&encryption),
                            refs: 1,
                            idle_since: None,
                        },
                    );
                    encryption
                })
            }
        };

        Self::dispose(evicted);
        result
    }

    /// Drops one hold on the entry for `partition_id`. At zero holders the entry goes idle.
    ///
    /// `encryption` must be the context [`SessionCache::acquire`] returned; a release for an
    /// entry that has since been replaced or closed is ignored.
    pub fn release(&self, partition_id: &str, encryption: &Arc<dyn Encryption>) {
        let mut evicted = Evicted::new();

        {
            let mut inner = self.inner.lock();

            match inner.entries.get_mut(partition_id) {
                Some(entry) if same_encryption(&entry.encryption, encryption) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    if entry.refs == 0 {
                        entry.idle_since = Some(Instant::now());
                    }
                }
                _ => log::debug!("release of uncached session for partition {}", partition_id),
            }

            if inner.entries.len() > self.max_size {
                let needed = inner.entries.len() - self.max_size;
                self.compact_locked(&mut inner, needed, &mut evicted);
            }
        }

        Self::dispose(evicted);
    }

    /// Closes every idle entry whose TTL has run out
    pub fn purge_expired(&self) {
        let mut evicted = Evicted::new();
        {
            let mut inner = self.inner.lock();
            self.purge_locked(&mut inner, Instant::now(), &mut evicted);
        }
        Self::dispose(evicted);
    }

    /// Closes every entry, held or not. Later acquires fail with [`Error::CacheClosed`].
    pub fn close(&self) {
        let evicted: Evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.entries.drain().map(|(id, entry)| (id, entry.encryption)).collect()
        };

        log::debug!("closing session cache with {} entries", evicted.len());
        Self::dispose(evicted);
    }

    /// Number of cached entries, held or idle
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry for `partition_id` is cached
    pub fn contains(&self, partition_id: &str) -> bool {
        self.inner.lock().entries.contains_key(partition_id)
    }

    fn purge_locked(&self, inner: &mut Inner, now: Instant, evicted: &mut Evicted) {
        let ttl = self.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .idle_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= ttl)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(entry) = inner.entries.remove(&id) {
                log::debug!("session for partition {} expired", id);
                evicted.push((id, entry.encryption));
            }
        }
    }

    /// Evicts idle entries, longest idle first: at least `needed`, and a batch of a tenth
    /// of the capacity so the next few inserts don't have to compact again.
    fn compact_locked(&self, inner: &mut Inner, needed: usize, evicted: &mut Evicted) {
        let batch = std::cmp::max(1, self.max_size / 10);
        let count = std::cmp::max(needed, batch);

        let mut idle: Vec<(Instant, String)> = inner
            .entries
            .iter()
            .filter_map(|(id, entry)| entry.idle_since.map(|since| (since, id.clone())))
            .collect();
        idle.sort();

        if idle.len() < needed {
            log::debug!(
                "session cache over capacity: {} entries, {} idle, max {}",
                inner.entries.len(),
                idle.len(),
                self.max_size
            );
        }

        for (_, id) in idle.into_iter().take(count) {
            if let Some(entry) = inner.entries.remove(&id) {
                evicted.push((id, entry.encryption));
            }
        }
    }

    fn dispose(evicted: Evicted) {
        for (id, encryption) in evicted {
            increment_counter("ael.session_cache.evicted");
            if let Err(e) = encryption.close() {
                log::error!("failed to close session for partition {}: {}", id, e);
            }
        }
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        self.close();
    }
}
