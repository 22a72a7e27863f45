//! Key Management Service implementations
//!
//! A KMS holds the master key that wraps system keys. Only the static, in-process KMS
//! ships with this crate; anything else (cloud KMS, HSM) plugs in by implementing
//! [`KeyManagementService`](crate::KeyManagementService).

mod static_kms;

pub use static_kms::StaticKeyManagementService;
