//! Cryptographic primitives for the rowcrypt library

mod aead;
pub mod aes256gcm;

pub use aead::{fill_random, GCM_NONCE_SIZE, GCM_TAG_SIZE};
pub use aes256gcm::Aes256GcmAead;
