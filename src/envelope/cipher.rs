use crate::error::Result;
use crate::key::CryptoKey;
use crate::policy::now_unix;
use crate::Aead;
use securememory::SecretFactory;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Output of [`EnvelopeCipher::envelope_encrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeEncryptResult {
    /// Payload encrypted under the data row key
    pub cipher_text: Vec<u8>,
    /// Data row key wrapped under the key-encryption key
    pub encrypted_key: Vec<u8>,
    /// Creation time of the data row key
    pub created: i64,
}

/// Key wrapping and single-use data key encryption on top of an [`Aead`]
///
/// Plaintext key bytes only exist inside protected memory or inside the scope of a single
/// call, and every temporary copy is zeroized before the call returns.
pub struct EnvelopeCipher {
    aead: Arc<dyn Aead>,
    secret_factory: Arc<dyn SecretFactory>,
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("aead", &self.aead)
            .finish_non_exhaustive()
    }
}

impl EnvelopeCipher {
    /// Creates a cipher
    pub fn new(aead: Arc<dyn Aead>, secret_factory: Arc<dyn SecretFactory>) -> Self {
        Self {
            aead,
            secret_factory,
        }
    }

    /// The secret factory new keys are allocated from
    pub fn secret_factory(&self) -> &Arc<dyn SecretFactory> {
        &self.secret_factory
    }

    /// Generates a random key directly in protected memory
    pub fn generate_key(&self, created: i64) -> Result<CryptoKey> {
        CryptoKey::generate(self.secret_factory.as_ref(), created, self.aead.key_size())
    }

    /// Encrypts the raw bytes of `key` under `kek`
    pub fn wrap_key(&self, key: &CryptoKey, kek: &CryptoKey) -> Result<Vec<u8>> {
        key.with_bytes(|raw| kek.with_bytes(|kek_bytes| self.aead.encrypt(raw, kek_bytes)))
    }

    /// Decrypts a wrapped key under `kek` and moves it into protected memory
    pub fn unwrap_key(
        &self,
        wrapped: &[u8],
        created: i64,
        kek: &CryptoKey,
        revoked: bool,
    ) -> Result<CryptoKey> {
        let mut raw = Zeroizing::new(kek.with_bytes(|kek_bytes| self.aead.decrypt(wrapped, kek_bytes))?);

        CryptoKey::new(created, revoked, &mut raw[..], self.secret_factory.as_ref())
    }

    /// Encrypts `plaintext` under a fresh data row key and wraps that key under `kek`
    pub fn envelope_encrypt(&self, plaintext: &[u8], kek: &CryptoKey) -> Result<EnvelopeEncryptResult> {
        let created = now_unix();
        let data_key = self.generate_key(created)?;

        let cipher_text = data_key.with_bytes(|dk| self.aead.encrypt(plaintext, dk))?;
        let encrypted_key = self.wrap_key(&data_key, kek)?;

        Ok(EnvelopeEncryptResult {
            cipher_text,
            encrypted_key,
            created,
        })
    }

    /// Unwraps the data row key with `kek` and decrypts `cipher_text` with it
    pub fn envelope_decrypt(
        &self,
        cipher_text: &[u8],
        encrypted_key: &[u8],
        created: i64,
        kek: &CryptoKey,
    ) -> Result<Vec<u8>> {
        let data_key = self
            .unwrap_key(encrypted_key, created, kek, false)
            .map_err(|e| e.context("unwrap data row key"))?;

        data_key
            .with_bytes(|dk| self.aead.decrypt(cipher_text, dk))
            .map_err(|e| e.context("decrypt payload"))
    }
}
