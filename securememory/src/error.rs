use thiserror::Error;

/// Errors that can occur while managing protected memory.
#[derive(Error, Debug)]
pub enum SecureMemoryError {
    /// The pages backing a secret could not be mapped.
    #[error("Failed to allocate secure memory: {0}")]
    AllocationFailed(String),

    /// The memory protection could not be changed.
    #[error("Failed to set memory protection: {0}")]
    ProtectionFailed(String),

    /// The pages could not be unmapped.
    #[error("Failed to free memory: {0}")]
    DeallocationFailed(String),

    /// The secret has already been closed (or is closing).
    #[error("Secret is already closed")]
    SecretClosed,

    /// A secret of this size cannot be created.
    #[error("Invalid size specified: {0}")]
    InvalidSize(String),

    /// The OS random source failed.
    #[error("Random generation failed: {0}")]
    RandomGenerationFailed(String),

    /// Anything else that went wrong while using a secret.
    #[error("Secret operation failed: {0}")]
    OperationFailed(String),
}

/// Result type for securememory operations.
pub type Result<T> = std::result::Result<T, SecureMemoryError>;
