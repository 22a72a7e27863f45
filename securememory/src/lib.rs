//! # Secure Memory
//!
//! Storage for key material that stays out of reach when it is not being used.
//!
//! A [`ProtectedMemorySecret`](protected_memory::ProtectedMemorySecret) copies its bytes
//! into a dedicated page-aligned mapping that is locked into RAM (`mlock`), excluded from
//! core dumps, and kept `PROT_NONE` between accesses. Readers get a scoped, read-only view
//! through [`Secret::access`] or [`SecretExtensions::with_bytes`]; the last reader out
//! puts the pages back to no-access. Closing a secret waits for readers to finish, then
//! zeroes and unmaps the pages.
//!
//! ```rust,no_run
//! use securememory::{DefaultSecretFactory, SecretExtensions, SecretFactory};
//!
//! let factory = DefaultSecretFactory::new();
//!
//! let mut key = vec![7_u8; 32];
//! let secret = factory.create(&mut key).unwrap();
//! assert!(key.iter().all(|b| *b == 0));
//!
//! let first = secret.with_bytes(|bytes| bytes[0]).unwrap();
//! assert_eq!(first, 7);
//!
//! secret.close().unwrap();
//! assert!(secret.is_closed());
//! ```

/// Secret traits
pub mod secret;

/// Protected memory implementation of Secret
pub mod protected_memory;

/// Error types
pub mod error;

pub use crate::error::{Result, SecureMemoryError};
pub use crate::protected_memory::DefaultSecretFactory;
pub use crate::secret::{Secret, SecretExtensions, SecretFactory};
