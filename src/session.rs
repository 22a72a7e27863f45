//! Sessions and the factory that hands them out
//!
//! A [`SessionFactory`] owns everything that is shared across partitions: the metastore,
//! the KMS, the policy and the system key cache. A [`Session`] is bound to one partition
//! and is cheap to create; with session caching enabled, sessions for the same partition
//! share one encryption context and its intermediate key cache.

use crate::crypto::Aes256GcmAead;
use crate::envelope::{DataRowRecord, EnvelopeCipher, EnvelopeEncryption, EnvelopeKeyManager, ExpiredKeyObserver};
use crate::error::{Error, Result};
use crate::partition::{DefaultPartition, Partition, SuffixedPartition};
use crate::policy::{BasicExpiringCryptoPolicy, CryptoPolicy};
use crate::session_cache::SessionCache;
use crate::{timer, Aead, Encryption, KeyManagementService, Loader, Metastore, Storer};

use securememory::{DefaultSecretFactory, SecretFactory};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Encrypts and decrypts for a single partition
///
/// Release the session with [`Session::close`] or by dropping it. Encrypting or decrypting
/// after close fails with [`Error::CacheClosed`].
#[derive(Debug)]
pub struct Session {
    partition_id: String,
    encryption: Arc<dyn Encryption>,
    /// `None` when the session owns its context outright
    cache: Option<Arc<SessionCache>>,
    closed: AtomicBool,
}

impl Session {
    /// The partition this session is bound to
    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::CacheClosed(format!(
                "session for partition {}",
                self.partition_id
            )));
        }
        Ok(())
    }

    /// Encrypts a payload
    pub fn encrypt(&self, data: &[u8]) -> Result<DataRowRecord> {
        self.ensure_open()?;
        let _timer = timer!("ael.session.encrypt");

        self.encryption.encrypt_payload(data)
    }

    /// Decrypts a data row record
    pub fn decrypt(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let _timer = timer!("ael.session.decrypt");

        self.encryption.decrypt_data_row_record(drr)
    }

    /// Encrypts a payload and returns the data row record as JSON
    pub fn encrypt_to_json(&self, data: &[u8]) -> Result<String> {
        self.encrypt(data)?.to_json()
    }

    /// Decrypts a data row record given as JSON
    pub fn decrypt_from_json(&self, json: &str) -> Result<Vec<u8>> {
        let drr = DataRowRecord::from_json(json)?;
        self.decrypt(&drr)
    }

    /// Encrypts `payload` and hands the record to `storer`, returning its key
    pub fn store<S: Storer + ?Sized>(&self, payload: &[u8], storer: &S) -> Result<S::Key> {
        let drr = self.encrypt(payload)?;
        storer.store(&drr)
    }

    /// Loads the record stored under `key` and decrypts it. `Ok(None)` when the loader has
    /// no such record.
    pub fn load<L: Loader + ?Sized>(&self, key: &L::Key, loader: &L) -> Result<Option<Vec<u8>>> {
        match loader.load(key)? {
            Some(drr) => self.decrypt(&drr).map(Some),
            None => Ok(None),
        }
    }

    /// Releases the session. Calling it again, or dropping the session afterwards, is a
    /// no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match &self.cache {
            Some(cache) => cache.release(&self.partition_id, &self.encryption),
            None => {
                if let Err(e) = self.encryption.close() {
                    log::error!("failed to close session for partition {}: {}", self.partition_id, e);
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Creates [`Session`]s and runs one-shot encrypt/decrypt calls
pub struct SessionFactory {
    service: String,
    product: String,
    region_suffix: Option<String>,
    manager: Arc<EnvelopeKeyManager>,
    session_cache: Option<Arc<SessionCache>>,
    closed: AtomicBool,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("service", &self.service)
            .field("product", &self.product)
            .field("region_suffix", &self.region_suffix)
            .field("session_cache", &self.session_cache.as_ref().map(|c| c.len()))
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SessionFactory {
    /// Starts building a factory for `service`/`product`
    pub fn builder(service: impl Into<String>, product: impl Into<String>) -> SessionFactoryBuilder {
        SessionFactoryBuilder::new(service, product)
    }

    /// The partition implementation key ids are derived with
    fn partition(&self, partition_id: &str) -> Result<Arc<dyn Partition>> {
        if partition_id.is_empty() {
            return Err(Error::Config("partition id cannot be empty".into()));
        }

        Ok(match &self.region_suffix {
            Some(suffix) => Arc::new(SuffixedPartition::new(
                partition_id,
                self.service.as_str(),
                self.product.as_str(),
                suffix.as_str(),
            )?),
            None => Arc::new(DefaultPartition::new(
                partition_id,
                self.service.as_str(),
                self.product.as_str(),
            )?),
        })
    }

    /// Returns a session for `partition_id`
    pub fn session(&self, partition_id: &str) -> Result<Session> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::CacheClosed("session factory".into()));
        }

        let partition = self.partition(partition_id)?;

        let encryption: Arc<dyn Encryption> = match &self.session_cache {
            Some(cache) => cache.acquire(partition_id, || {
                log::debug!("creating cached session for partition {}", partition_id);
                let encryption: Arc<dyn Encryption> =
                    Arc::new(EnvelopeEncryption::new(partition, Arc::clone(&self.manager)));
                Ok(encryption)
            })?,
            None => Arc::new(EnvelopeEncryption::new(partition, Arc::clone(&self.manager))),
        };

        Ok(Session {
            partition_id: partition_id.to_string(),
            encryption,
            cache: self.session_cache.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Encrypts `data` for `partition_id` with a short-lived session
    pub fn encrypt(&self, partition_id: &str, data: &[u8]) -> Result<DataRowRecord> {
        let session = self.session(partition_id)?;
        let result = session.encrypt(data);
        session.close();
        result
    }

    /// Decrypts `drr` for `partition_id` with a short-lived session
    pub fn decrypt(&self, partition_id: &str, drr: &DataRowRecord) -> Result<Vec<u8>> {
        let session = self.session(partition_id)?;
        let result = session.decrypt(drr);
        session.close();
        result
    }

    /// [`SessionFactory::encrypt`] on tokio's blocking pool
    pub async fn encrypt_async(
        self: &Arc<Self>,
        partition_id: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<DataRowRecord> {
        let factory = Arc::clone(self);
        let partition_id = partition_id.into();

        tokio::task::spawn_blocking(move || factory.encrypt(&partition_id, &data))
            .await
            .map_err(|e| Error::Internal(format!("encrypt task failed: {}", e)))?
    }

    /// [`SessionFactory::decrypt`] on tokio's blocking pool
    pub async fn decrypt_async(
        self: &Arc<Self>,
        partition_id: impl Into<String>,
        drr: DataRowRecord,
    ) -> Result<Vec<u8>> {
        let factory = Arc::clone(self);
        let partition_id = partition_id.into();

        tokio::task::spawn_blocking(move || factory.decrypt(&partition_id, &drr))
            .await
            .map_err(|e| Error::Internal(format!("decrypt task failed: {}", e)))?
    }

    /// Number of cached sessions, or `None` when session caching is off
    pub fn cached_sessions(&self) -> Option<usize> {
        self.session_cache.as_ref().map(|cache| cache.len())
    }

    /// Closes idle cached sessions whose TTL has passed
    pub fn purge_expired_sessions(&self) {
        if let Some(cache) = &self.session_cache {
            cache.purge_expired();
        }
    }

    /// Closes all cached sessions and wipes all cached keys. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(cache) = &self.session_cache {
            cache.close();
        }
        self.manager.close();
    }
}

impl Drop for SessionFactory {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`SessionFactory`]
pub struct SessionFactoryBuilder {
    service: String,
    product: String,
    metastore: Option<Arc<dyn Metastore>>,
    kms: Option<Arc<dyn KeyManagementService>>,
    policy: Option<Arc<dyn CryptoPolicy>>,
    aead: Option<Arc<dyn Aead>>,
    secret_factory: Option<Arc<dyn SecretFactory>>,
    region_suffix: Option<String>,
    observer: Option<Arc<ExpiredKeyObserver>>,
    metrics: Option<bool>,
}

impl SessionFactoryBuilder {
    /// Creates a builder
    pub fn new(service: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            product: product.into(),
            metastore: None,
            kms: None,
            policy: None,
            aead: None,
            secret_factory: None,
            region_suffix: None,
            observer: None,
            metrics: None,
        }
    }

    /// Sets the metastore
    pub fn with_metastore(mut self, metastore: Arc<dyn Metastore>) -> Self {
        self.metastore = Some(metastore);
        self
    }

    /// Sets the key management service
    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    /// Sets the crypto policy. Defaults to [`BasicExpiringCryptoPolicy::default`].
    pub fn with_policy(mut self, policy: Arc<dyn CryptoPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the AEAD implementation. Defaults to AES-256-GCM.
    pub fn with_aead(mut self, aead: Arc<dyn Aead>) -> Self {
        self.aead = Some(aead);
        self
    }

    /// Sets the secret factory. Defaults to protected memory.
    pub fn with_secret_factory(mut self, secret_factory: Arc<dyn SecretFactory>) -> Self {
        self.secret_factory = Some(secret_factory);
        self
    }

    /// Suffixes every key id with `suffix`, overriding the metastore's own suffix
    pub fn with_region_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.region_suffix = Some(suffix.into());
        self
    }

    /// Registers a callback for reads of expired keys
    pub fn with_expired_key_observer(
        mut self,
        observer: impl Fn(crate::policy::KeyType, &crate::KeyMeta) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Turns metric emission on or off
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = Some(enabled);
        self
    }

    /// Builds the SessionFactory
    pub fn build(self) -> Result<SessionFactory> {
        if self.service.is_empty() {
            return Err(Error::Config("service name is required".into()));
        }
        if self.product.is_empty() {
            return Err(Error::Config("product id is required".into()));
        }

        let metastore = self
            .metastore
            .ok_or_else(|| Error::Config("metastore is required".into()))?;
        let kms = self
            .kms
            .ok_or_else(|| Error::Config("key management service is required".into()))?;
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(BasicExpiringCryptoPolicy::default()));
        let aead = self.aead.unwrap_or_else(|| Arc::new(Aes256GcmAead::new()));
        let secret_factory = self
            .secret_factory
            .unwrap_or_else(|| Arc::new(DefaultSecretFactory::new()));

        match self.metrics {
            Some(true) => crate::metrics::enable_metrics(),
            Some(false) => crate::metrics::disable_metrics(),
            None => {}
        }

        let region_suffix = self
            .region_suffix
            .or_else(|| metastore.key_suffix())
            .filter(|suffix| !suffix.is_empty());

        let session_cache = if policy.can_cache_sessions() {
            Some(Arc::new(SessionCache::from_policy(policy.as_ref())))
        } else {
            None
        };

        let cipher = EnvelopeCipher::new(aead, secret_factory);
        let mut manager = EnvelopeKeyManager::new(metastore, kms, Arc::clone(&policy), cipher);
        if let Some(observer) = self.observer {
            manager = manager.with_expired_key_observer(observer);
        }

        log::debug!(
            "session factory for {}/{} built, session cache {}",
            self.service,
            self.product,
            if session_cache.is_some() { "on" } else { "off" }
        );

        Ok(SessionFactory {
            service: self.service,
            product: self.product,
            region_suffix,
            manager: Arc::new(manager),
            session_cache,
            closed: AtomicBool::new(false),
        })
    }
}
