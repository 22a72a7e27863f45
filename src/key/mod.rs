//! Key material held in protected memory

pub mod cache;

use crate::error::Result;
use crate::policy::CryptoPolicy;
use securememory::{Secret, SecretExtensions, SecretFactory};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use cache::SecureKeyCache;

/// An unwrapped key stored in protected memory
///
/// The raw bytes are only reachable inside [`CryptoKey::with_bytes`]. The secret is wiped
/// on [`CryptoKey::close`] or on drop, whichever happens first.
pub struct CryptoKey {
    /// Unix seconds
    created: i64,

    revoked: AtomicBool,

    secret: Box<dyn Secret>,
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoKey")
            .field("created", &self.created)
            .field("secret", &"<hidden>")
            .field("revoked", &self.is_revoked())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CryptoKey {
    /// Moves `bytes` into a new secret. The source buffer is wiped even if creation fails.
    pub fn new(
        created: i64,
        revoked: bool,
        bytes: &mut [u8],
        secret_factory: &dyn SecretFactory,
    ) -> Result<Self> {
        let secret = secret_factory.create(bytes)?;

        Ok(Self::from_secret(secret, created, revoked))
    }

    /// Wraps an existing secret
    pub fn from_secret(secret: Box<dyn Secret>, created: i64, revoked: bool) -> Self {
        Self {
            created,
            revoked: AtomicBool::new(revoked),
            secret,
        }
    }

    /// Generates a new random key of the specified size
    pub fn generate(secret_factory: &dyn SecretFactory, created: i64, size: usize) -> Result<Self> {
        let secret = secret_factory.create_random(size)?;

        Ok(Self::from_secret(secret, created, false))
    }

    /// Returns the timestamp when the key was created
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Checks if the key has been revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Marks the key as revoked
    pub fn set_revoked(&self, revoked: bool) {
        self.revoked.store(revoked, Ordering::Release);
    }

    /// Checks if the key is closed
    pub fn is_closed(&self) -> bool {
        self.secret.is_closed()
    }

    /// Wipes the key. Safe to call more than once.
    pub(crate) fn close(&self) -> Result<()> {
        self.secret.close()?;
        Ok(())
    }

    /// Provides temporary access to the key bytes
    pub fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        self.secret.with_bytes(action)?
    }
}

impl Drop for CryptoKey {
    fn drop(&mut self) {
        if let Err(e) = self.secret.close() {
            log::error!("failed to wipe key created at {}: {}", self.created, e);
        }
    }
}

/// Reference-counted handle to a [`CryptoKey`]
///
/// Clones share the same key. Closing a handle only releases it; the key is wiped when the
/// last handle goes away, or earlier if the cache that owns it is disposed.
#[derive(Debug, Clone)]
pub struct SharedCryptoKey(Arc<CryptoKey>);

impl SharedCryptoKey {
    /// Takes ownership of `key`
    pub fn new(key: CryptoKey) -> Self {
        Self(Arc::new(key))
    }

    /// Number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles point at the same key
    pub fn ptr_eq(&self, other: &SharedCryptoKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Releases this handle. Other holders are unaffected.
    pub fn close(self) {
        drop(self);
    }

    /// Wipes the key for every holder
    pub(crate) fn wipe(&self) -> Result<()> {
        self.0.close()
    }
}

impl Deref for SharedCryptoKey {
    type Target = CryptoKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<CryptoKey> for SharedCryptoKey {
    fn from(key: CryptoKey) -> Self {
        Self::new(key)
    }
}

/// Checks if a key is invalid (expired or revoked)
pub fn is_key_invalid(key: &CryptoKey, policy: &dyn CryptoPolicy) -> bool {
    key.is_revoked() || policy.is_key_expired(key.created())
}
