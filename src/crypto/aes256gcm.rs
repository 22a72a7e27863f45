use crate::crypto::aead::{fill_random, GCM_MAX_DATA_SIZE, GCM_NONCE_SIZE, GCM_TAG_SIZE};
use crate::error::{Error, Result};
use crate::{Aead, AES256_KEY_SIZE};
use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Key as AesKey, Nonce, Tag,
};

/// AES-256-GCM implementation of AEAD
///
/// Output layout is `ciphertext || tag || nonce`, so an encrypted blob is always
/// `plaintext.len() + 28` bytes. A fresh 96-bit nonce is drawn from the OS RNG for every
/// call.
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmAead;

impl Aes256GcmAead {
    /// Creates a new instance of the AES-256-GCM AEAD implementation
    pub fn new() -> Self {
        Self
    }

    // The cipher state zeroizes itself on drop.
    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        if key.len() != AES256_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "invalid key length {}, expected {}",
                key.len(),
                AES256_KEY_SIZE
            )));
        }

        Ok(Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key)))
    }
}

impl Aead for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() as u64 > GCM_MAX_DATA_SIZE {
            return Err(Error::Crypto("Data too large for GCM".into()));
        }

        let cipher = Self::cipher(key)?;

        let mut nonce = [0_u8; GCM_NONCE_SIZE];
        fill_random(&mut nonce);

        let mut out = Vec::with_capacity(data.len() + GCM_TAG_SIZE + GCM_NONCE_SIZE);
        out.extend_from_slice(data);

        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut out)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        out.extend_from_slice(&tag);
        out.extend_from_slice(&nonce);

        Ok(out)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
            return Err(Error::Integrity(format!(
                "ciphertext of {} bytes is shorter than nonce + tag",
                data.len()
            )));
        }

        let cipher = Self::cipher(key)?;

        let nonce_start = data.len() - GCM_NONCE_SIZE;
        let tag_start = nonce_start - GCM_TAG_SIZE;

        let nonce = Nonce::from_slice(&data[nonce_start..]);
        let tag = Tag::from_slice(&data[tag_start..nonce_start]);

        let mut out = data[..tag_start].to_vec();
        cipher
            .decrypt_in_place_detached(nonce, b"", &mut out, tag)
            .map_err(|_| Error::Integrity("authentication tag mismatch".into()))?;

        Ok(out)
    }

    fn key_size(&self) -> usize {
        AES256_KEY_SIZE
    }

    fn nonce_size(&self) -> usize {
        GCM_NONCE_SIZE
    }

    fn tag_size(&self) -> usize {
        GCM_TAG_SIZE
    }
}
