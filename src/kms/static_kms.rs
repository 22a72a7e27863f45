use crate::crypto::Aes256GcmAead;
use crate::error::{Error, Result};
use crate::key::CryptoKey;
use crate::{Aead, KeyManagementService, AES256_KEY_SIZE};
use securememory::SecretFactory;
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// A key management service backed by a master key held in process memory
///
/// Useful for tests and local development. The master key lives in protected memory for
/// the lifetime of the service, but anyone with the key material can unwrap every system
/// key, so production deployments should use a real KMS.
pub struct StaticKeyManagementService {
    master_key: CryptoKey,
    aead: Aes256GcmAead,
    secret_factory: Arc<dyn SecretFactory>,
}

impl fmt::Debug for StaticKeyManagementService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyManagementService")
            .field("master_key", &self.master_key)
            .finish_non_exhaustive()
    }
}

impl StaticKeyManagementService {
    /// Creates a service from a 32-byte master key. The passed buffer is wiped.
    pub fn new(mut master_key: Vec<u8>, secret_factory: Arc<dyn SecretFactory>) -> Result<Self> {
        if master_key.len() != AES256_KEY_SIZE {
            let len = master_key.len();
            master_key.zeroize();
            return Err(Error::Config(format!(
                "static master key must be {} bytes, got {}",
                AES256_KEY_SIZE, len
            )));
        }

        let master_key = CryptoKey::new(0, false, &mut master_key, secret_factory.as_ref())?;

        Ok(Self {
            master_key,
            aead: Aes256GcmAead::new(),
            secret_factory,
        })
    }
}

impl KeyManagementService for StaticKeyManagementService {
    fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.master_key
            .with_bytes(|mk| self.aead.encrypt(key, mk))
            .map_err(|e| Error::Kms(format!("wrap_key: {}", e)))
    }

    fn unwrap_key(&self, wrapped: &[u8], created: i64, revoked: bool) -> Result<CryptoKey> {
        let mut raw = Zeroizing::new(
            self.master_key
                .with_bytes(|mk| self.aead.decrypt(wrapped, mk))
                .map_err(|e| Error::Kms(format!("unwrap_key: {}", e)))?,
        );

        CryptoKey::new(created, revoked, &mut raw[..], self.secret_factory.as_ref())
    }
}
