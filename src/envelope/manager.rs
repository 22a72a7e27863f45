use crate::envelope::{EnvelopeCipher, EnvelopeKeyRecord, KeyMeta};
use crate::error::{Error, Result};
use crate::key::{CryptoKey, SecureKeyCache, SharedCryptoKey};
use crate::metrics::increment_counter;
use crate::partition::Partition;
use crate::policy::{CryptoPolicy, KeyType};
use crate::{timer, KeyManagementService, Metastore};

use std::fmt;
use std::sync::Arc;

/// Callback invoked when an expired key is read and the policy asks to be told
pub type ExpiredKeyObserver = dyn Fn(KeyType, &KeyMeta) + Send + Sync;

/// Resolves, creates and caches system and intermediate keys
///
/// One manager is shared by every partition of a factory. It owns the system key cache;
/// each partition brings its own intermediate key cache.
pub struct EnvelopeKeyManager {
    metastore: Arc<dyn Metastore>,
    kms: Arc<dyn KeyManagementService>,
    policy: Arc<dyn CryptoPolicy>,
    cipher: EnvelopeCipher,
    system_keys: SecureKeyCache<KeyMeta>,
    observer: Option<Arc<ExpiredKeyObserver>>,
}

impl fmt::Debug for EnvelopeKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeKeyManager")
            .field("metastore", &self.metastore)
            .field("kms", &self.kms)
            .field("policy", &self.policy)
            .field("system_keys", &self.system_keys)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl EnvelopeKeyManager {
    /// Creates a manager
    pub fn new(
        metastore: Arc<dyn Metastore>,
        kms: Arc<dyn KeyManagementService>,
        policy: Arc<dyn CryptoPolicy>,
        cipher: EnvelopeCipher,
    ) -> Self {
        let system_keys = SecureKeyCache::new("system", policy.revoke_check_period());

        Self {
            metastore,
            kms,
            policy,
            cipher,
            system_keys,
            observer: None,
        }
    }

    /// Registers a callback for reads of expired keys
    pub fn with_expired_key_observer(mut self, observer: Arc<ExpiredKeyObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The policy this manager applies
    pub fn policy(&self) -> &Arc<dyn CryptoPolicy> {
        &self.policy
    }

    /// The cipher used for wrapping keys and payloads
    pub fn cipher(&self) -> &EnvelopeCipher {
        &self.cipher
    }

    /// Creates an empty intermediate key cache for one partition
    pub fn new_intermediate_key_cache(&self) -> SecureKeyCache<i64> {
        SecureKeyCache::new("intermediate", self.policy.revoke_check_period())
    }

    /// Number of system keys currently cached
    pub fn cached_system_keys(&self) -> usize {
        self.system_keys.len()
    }

    /// Returns the partition's latest usable intermediate key, creating (and if necessary
    /// creating the system key for) a new one when there is none.
    pub fn get_or_create_intermediate_key(
        &self,
        partition: &dyn Partition,
        ik_cache: &SecureKeyCache<i64>,
    ) -> Result<SharedCryptoKey> {
        let _timer = timer!("ael.envelope.get_latest_intermediate_key");

        let ik_id = partition.intermediate_key_id();

        if self.policy.can_cache_intermediate_keys() {
            if let Some(ik) = ik_cache.get_latest()? {
                let (revoked, created) = (ik.is_revoked(), ik.created());
                if self.is_usable_latest(KeyType::Intermediate, &ik_id, revoked, created) {
                    return Ok(ik);
                }
            }
        }

        let latest = self
            .metastore
            .load_latest(&ik_id)
            .map_err(|e| e.context("load latest intermediate key"))?;

        if let Some(record) = latest {
            let (revoked, created) = (record.is_revoked(), record.created);
            if self.is_usable_latest(KeyType::Intermediate, &ik_id, revoked, created) {
                match self.unwrap_intermediate_key(&ik_id, &record) {
                    Ok(ik) => return self.cache_intermediate_key(ik_cache, record.created, ik),
                    Err(e @ Error::CacheClosed(_)) => return Err(e),
                    Err(e) => log::warn!(
                        "unable to unwrap intermediate key {}:{}, creating a new one: {}",
                        ik_id,
                        record.created,
                        e
                    ),
                }
            }
        }

        self.create_intermediate_key(partition, ik_cache)
    }

    /// Resolves the exact intermediate key a data row record was written with
    pub fn get_intermediate_key(
        &self,
        partition: &dyn Partition,
        ik_cache: &SecureKeyCache<i64>,
        meta: &KeyMeta,
    ) -> Result<SharedCryptoKey> {
        let _timer = timer!("ael.envelope.get_intermediate_key");

        // keys from another region's id stay out of this partition's cache
        let own = meta.id == partition.intermediate_key_id();
        let cacheable = own && self.policy.can_cache_intermediate_keys();

        if cacheable {
            if let Some(ik) = ik_cache.get(&meta.created)? {
                self.notify_if_expired(KeyType::Intermediate, meta, ik.created());
                return Ok(ik);
            }
        }

        let record = self
            .metastore
            .load(&meta.id, meta.created)
            .map_err(|e| e.context("load intermediate key"))?
            .ok_or_else(|| Error::MetadataMissing(format!("intermediate key {} not found", meta)))?;

        let ik = self.unwrap_intermediate_key(&meta.id, &record)?;
        self.notify_if_expired(KeyType::Intermediate, meta, ik.created());

        if cacheable {
            ik_cache.put_if_absent_and_get_shared(meta.created, ik)
        } else {
            Ok(SharedCryptoKey::new(ik))
        }
    }

    /// Wipes every cached system key
    pub fn close(&self) {
        self.system_keys.dispose();
    }

    fn create_intermediate_key(
        &self,
        partition: &dyn Partition,
        ik_cache: &SecureKeyCache<i64>,
    ) -> Result<SharedCryptoKey> {
        let sk = self.get_or_create_system_key(partition)?;

        let ik_id = partition.intermediate_key_id();
        let created = self.policy.new_key_timestamp();
        let ik = self.cipher.generate_key(created)?;

        let record = EnvelopeKeyRecord::new(
            created,
            self.cipher.wrap_key(&ik, &sk)?,
            Some(KeyMeta::new(partition.system_key_id(), sk.created())),
        );

        let stored = self
            .metastore
            .store(&ik_id, created, &record)
            .map_err(|e| e.context("store intermediate key"))?;

        if stored {
            log::debug!("created intermediate key {}:{}", ik_id, created);
            return self.cache_intermediate_key(ik_cache, created, ik);
        }

        // someone else stored a key for this timestamp first
        drop(ik);
        log::debug!("lost race creating intermediate key {}:{}, reloading", ik_id, created);

        let record = self
            .metastore
            .load_latest(&ik_id)
            .map_err(|e| e.context("load latest intermediate key"))?
            .ok_or_else(|| {
                Error::MetadataMissing(format!("latest intermediate key {} not found", ik_id))
            })?;

        let ik = self.unwrap_intermediate_key(&ik_id, &record)?;
        self.cache_intermediate_key(ik_cache, record.created, ik)
    }

    fn unwrap_intermediate_key(&self, ik_id: &str, record: &EnvelopeKeyRecord) -> Result<CryptoKey> {
        let parent = record.parent_key_meta.as_ref().ok_or_else(|| {
            Error::MetadataMissing(format!(
                "intermediate key {}:{} has no parent key meta",
                ik_id, record.created
            ))
        })?;

        let sk = self.get_system_key(parent)?;

        self.cipher
            .unwrap_key(&record.encrypted_key, record.created, &sk, record.is_revoked())
            .map_err(|e| e.context("unwrap intermediate key"))
    }

    fn cache_intermediate_key(
        &self,
        ik_cache: &SecureKeyCache<i64>,
        created: i64,
        ik: CryptoKey,
    ) -> Result<SharedCryptoKey> {
        if self.policy.can_cache_intermediate_keys() {
            ik_cache.put_if_absent_and_get_shared(created, ik)
        } else {
            Ok(SharedCryptoKey::new(ik))
        }
    }

    /// Exact system key lookup, used when unwrapping an intermediate key
    fn get_system_key(&self, meta: &KeyMeta) -> Result<SharedCryptoKey> {
        if self.policy.can_cache_system_keys() {
            if let Some(sk) = self.system_keys.get(meta)? {
                self.notify_if_expired(KeyType::System, meta, sk.created());
                return Ok(sk);
            }
        }

        let record = self
            .metastore
            .load(&meta.id, meta.created)
            .map_err(|e| e.context("load system key"))?
            .ok_or_else(|| Error::MetadataMissing(format!("system key {} not found", meta)))?;

        let sk = self.unwrap_system_key(&record)?;
        self.notify_if_expired(KeyType::System, meta, sk.created());

        self.cache_system_key(meta.clone(), sk)
    }

    fn get_or_create_system_key(&self, partition: &dyn Partition) -> Result<SharedCryptoKey> {
        let _timer = timer!("ael.envelope.get_latest_system_key");
        let sk_id = partition.system_key_id();

        if self.policy.can_cache_system_keys() {
            if let Some(sk) = self.system_keys.get_latest_in(KeyMeta::all_versions(&sk_id))? {
                if self.is_usable_latest(KeyType::System, &sk_id, sk.is_revoked(), sk.created()) {
                    return Ok(sk);
                }
            }
        }

        let latest = self
            .metastore
            .load_latest(&sk_id)
            .map_err(|e| e.context("load latest system key"))?;

        if let Some(record) = latest {
            if self.is_usable_latest(KeyType::System, &sk_id, record.is_revoked(), record.created) {
                let sk = self.unwrap_system_key(&record)?;
                return self.cache_system_key(KeyMeta::new(sk_id, record.created), sk);
            }
        }

        self.create_system_key(sk_id)
    }

    fn create_system_key(&self, sk_id: String) -> Result<SharedCryptoKey> {
        let created = self.policy.new_key_timestamp();
        let sk = self.cipher.generate_key(created)?;

        let wrapped = sk
            .with_bytes(|raw| self.kms.wrap_key(raw))
            .map_err(|e| e.context("wrap system key"))?;
        let record = EnvelopeKeyRecord::new(created, wrapped, None);

        let stored = self
            .metastore
            .store(&sk_id, created, &record)
            .map_err(|e| e.context("store system key"))?;

        if stored {
            log::debug!("created system key {}:{}", sk_id, created);
            return self.cache_system_key(KeyMeta::new(sk_id, created), sk);
        }

        drop(sk);
        log::debug!("lost race creating system key {}:{}, reloading", sk_id, created);

        let record = self
            .metastore
            .load_latest(&sk_id)
            .map_err(|e| e.context("load latest system key"))?
            .ok_or_else(|| Error::MetadataMissing(format!("latest system key {} not found", sk_id)))?;

        let sk = self.unwrap_system_key(&record)?;
        self.cache_system_key(KeyMeta::new(sk_id, record.created), sk)
    }

    fn unwrap_system_key(&self, record: &EnvelopeKeyRecord) -> Result<CryptoKey> {
        self.kms
            .unwrap_key(&record.encrypted_key, record.created, record.is_revoked())
            .map_err(|e| e.context("unwrap system key"))
    }

    fn cache_system_key(&self, meta: KeyMeta, sk: CryptoKey) -> Result<SharedCryptoKey> {
        if self.policy.can_cache_system_keys() {
            self.system_keys.put_if_absent_and_get_shared(meta, sk)
        } else {
            Ok(SharedCryptoKey::new(sk))
        }
    }

    /// Whether a latest key may be used for new encryptions. Serving an expired key under
    /// queued rotation counts as an expired read.
    fn is_usable_latest(&self, key_type: KeyType, id: &str, revoked: bool, created: i64) -> bool {
        if revoked {
            return false;
        }

        if !self.policy.is_key_expired(created) {
            return true;
        }

        if self.policy.is_inline_key_rotation() {
            return false;
        }

        log::info!(
            "{} key created at {} is expired; serving it until queued rotation replaces it",
            key_type,
            created
        );
        self.notify_if_expired(key_type, &KeyMeta::new(id, created), created);
        true
    }

    fn notify_if_expired(&self, key_type: KeyType, meta: &KeyMeta, created: i64) {
        if !self.policy.notify_expired_on_read(key_type) || !self.policy.is_key_expired(created) {
            return;
        }

        increment_counter("ael.key.expired_read");
        log::warn!("read of expired {} key {}", key_type, meta);

        if let Some(observer) = &self.observer {
            observer(key_type, meta);
        }
    }
}
