use thiserror::Error;

/// Result type for rowcrypt operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the rowcrypt library
///
/// Encrypt and decrypt either return a complete result or one of these; nothing is
/// retried inside the library.
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication tag verification failed: the ciphertext was tampered with, truncated,
    /// or decrypted with the wrong key
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The key management service failed or rejected a wrap/unwrap call
    #[error("KMS error: {0}")]
    Kms(String),

    /// The metastore has no record for a key the operation needs
    #[error("Metadata missing: {0}")]
    MetadataMissing(String),

    /// An operation was attempted on a cache after it was disposed
    #[error("Cache closed: {0}")]
    CacheClosed(String),

    /// Malformed or incomplete configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Errors reported by a metastore implementation
    #[error("Metastore error: {0}")]
    Metastore(String),

    /// Errors related to cryptographic operations other than authentication failures
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Errors related to secure memory operations
    #[error("Secure memory error: {0}")]
    SecureMemory(#[from] securememory::SecureMemoryError),

    /// Errors related to JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A data row record names an intermediate key that does not belong to the partition
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Prefixes the message with the name of the operation that failed.
    pub(crate) fn context(self, operation: &str) -> Self {
        match self {
            Error::Integrity(msg) => Error::Integrity(format!("{}: {}", operation, msg)),
            Error::Kms(msg) => Error::Kms(format!("{}: {}", operation, msg)),
            Error::MetadataMissing(msg) => Error::MetadataMissing(format!("{}: {}", operation, msg)),
            Error::Metastore(msg) => Error::Metastore(format!("{}: {}", operation, msg)),
            Error::Crypto(msg) => Error::Crypto(format!("{}: {}", operation, msg)),
            other => other,
        }
    }
}
