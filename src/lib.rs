//! # rowcrypt
//!
//! Application-level envelope encryption.
//!
//! `rowcrypt` manages a hierarchy of keys. A System Key (SK) per service/product is wrapped
//! by an external [`KeyManagementService`]. An Intermediate Key (IK) per partition is
//! wrapped by the system key. Each encrypt call gets a fresh Data Row Key, wrapped by the
//! intermediate key.
//!
//! Wrapped system and intermediate keys live in a [`Metastore`]. Unwrapped keys live in
//! protected memory (see the `securememory` crate), in caches whose revalidation cadence,
//! expiry and rotation behavior come from a [`CryptoPolicy`](policy::CryptoPolicy).
//!
//! Every encrypt produces a self-describing [`DataRowRecord`]. It carries the ciphertext,
//! the wrapped data key and the id/creation time of the intermediate key that wrapped it.
//! The record can be decrypted later even after that intermediate key has been rotated.
//!
//! All operations are synchronous and safe to call from any number of threads. The
//! `*_async` methods on [`SessionFactory`] simply offload to tokio's blocking pool.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use rowcrypt::kms::StaticKeyManagementService;
//! use rowcrypt::metastore::InMemoryMetastore;
//! use rowcrypt::session::SessionFactory;
//! use securememory::DefaultSecretFactory;
//! use std::sync::Arc;
//!
//! # fn example() -> rowcrypt::Result<()> {
//! let kms = StaticKeyManagementService::new(vec![0_u8; 32], Arc::new(DefaultSecretFactory::new()))?;
//!
//! let factory = SessionFactory::builder("service", "product")
//!     .with_metastore(Arc::new(InMemoryMetastore::new()))
//!     .with_kms(Arc::new(kms))
//!     .build()?;
//!
//! let session = factory.session("user123")?;
//!
//! let drr = session.encrypt(b"secret data")?;
//! let decrypted = session.decrypt(&drr)?;
//! assert_eq!(decrypted, b"secret data");
//!
//! session.close();
//! factory.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod key;
pub mod kms;
pub mod metastore;
pub mod metrics;
pub mod partition;
pub mod persistence;
pub mod policy;
pub mod session;
pub mod session_cache;


// Re-export key types
pub use crate::config::ConfigOptions;
pub use crate::envelope::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
pub use crate::error::{Error, Result};
pub use crate::key::{CryptoKey, SharedCryptoKey};
pub use crate::partition::{DefaultPartition, Partition, SuffixedPartition};
pub use crate::policy::{BasicExpiringCryptoPolicy, CryptoPolicy, NeverExpiredCryptoPolicy};
pub use crate::session::{Session, SessionFactory, SessionFactoryBuilder};
pub use crate::session_cache::SessionCache;

/// Size of AES-256 key in bytes
pub const AES256_KEY_SIZE: usize = 32;

use std::fmt;

/// Encryption interface for encrypting and decrypting data for one partition
pub trait Encryption: Send + Sync + fmt::Debug {
    /// Encrypts a payload and returns a data row record
    fn encrypt_payload(&self, data: &[u8]) -> Result<DataRowRecord>;

    /// Decrypts a data row record and returns the original data
    fn decrypt_data_row_record(&self, drr: &DataRowRecord) -> Result<Vec<u8>>;

    /// Releases every key this context holds. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Key Management Service interface for wrapping and unwrapping system keys
pub trait KeyManagementService: Send + Sync + fmt::Debug {
    /// Wraps raw key bytes with the master key
    fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Unwraps a key previously produced by [`KeyManagementService::wrap_key`] into protected
    /// memory, stamped with its creation time and revocation state
    fn unwrap_key(&self, wrapped: &[u8], created: i64, revoked: bool) -> Result<CryptoKey>;
}

/// Metastore interface for storing and retrieving wrapped keys
///
/// Records are keyed by `(id, created)`. Stores are insert-only: a second store for the
/// same pair must return `Ok(false)` so the caller knows it lost a creation race.
pub trait Metastore: Send + Sync + fmt::Debug {
    /// Loads a specific key by ID and creation timestamp
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>>;

    /// Loads the latest key for a given ID
    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>>;

    /// Stores a key in the metastore
    ///
    /// Returns true if the key was stored, false if a key already exists
    fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool>;

    /// Region (or other) suffix appended to key ids, if this metastore uses one
    fn key_suffix(&self) -> Option<String> {
        None
    }
}

/// AEAD (Authenticated Encryption with Associated Data) interface
pub trait Aead: Send + Sync + fmt::Debug {
    /// Encrypts data using the provided key
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts data using the provided key
    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Key length in bytes
    fn key_size(&self) -> usize;

    /// Nonce length in bytes
    fn nonce_size(&self) -> usize;

    /// Authentication tag length in bytes
    fn tag_size(&self) -> usize;
}

/// Loader interface for loading data from a persistence store
pub trait Loader: Send + Sync {
    /// Type of the key used to look up the data
    type Key: Send + Sync;

    /// Loads a data row record from the store using the provided key
    fn load(&self, key: &Self::Key) -> Result<Option<DataRowRecord>>;
}

/// Storer interface for storing data in a persistence store
pub trait Storer: Send + Sync {
    /// Type of the key returned after storing the data
    type Key;

    /// Stores a data row record and returns the key it can be loaded with
    fn store(&self, drr: &DataRowRecord) -> Result<Self::Key>;
}
