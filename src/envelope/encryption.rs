use crate::envelope::{DataRowRecord, EnvelopeKeyManager, EnvelopeKeyRecord, KeyMeta};
use crate::error::{Error, Result};
use crate::key::SecureKeyCache;
use crate::metrics::increment_counter;
use crate::partition::Partition;
use crate::{timer, Encryption};

use std::sync::Arc;

/// Envelope encryption for a single partition
///
/// Owns the partition's intermediate key cache; system keys come from the shared
/// [`EnvelopeKeyManager`].
#[derive(Debug)]
pub struct EnvelopeEncryption {
    partition: Arc<dyn Partition>,
    manager: Arc<EnvelopeKeyManager>,
    ik_cache: SecureKeyCache<i64>,
}

impl EnvelopeEncryption {
    /// Creates an encryption context for `partition`
    pub fn new(partition: Arc<dyn Partition>, manager: Arc<EnvelopeKeyManager>) -> Self {
        let ik_cache = manager.new_intermediate_key_cache();

        Self {
            partition,
            manager,
            ik_cache,
        }
    }

    /// The partition this context encrypts for
    pub fn partition(&self) -> &dyn Partition {
        self.partition.as_ref()
    }

    /// Number of intermediate keys currently cached for this partition
    pub fn cached_intermediate_keys(&self) -> usize {
        self.ik_cache.len()
    }
}

impl Encryption for EnvelopeEncryption {
    fn encrypt_payload(&self, data: &[u8]) -> Result<DataRowRecord> {
        let _timer = timer!("ael.envelope.encrypt");
        increment_counter("ael.envelope.encrypt.count");

        let ik = self
            .manager
            .get_or_create_intermediate_key(self.partition.as_ref(), &self.ik_cache)?;

        let result = self
            .manager
            .cipher()
            .envelope_encrypt(data, &ik)
            .map_err(|e| e.context("encrypt"))?;

        let mut key = EnvelopeKeyRecord::new(
            result.created,
            result.encrypted_key,
            Some(KeyMeta::new(self.partition.intermediate_key_id(), ik.created())),
        );
        if ik.is_revoked() {
            key.revoked = Some(true);
        }

        Ok(DataRowRecord {
            data: result.cipher_text,
            key,
        })
    }

    fn decrypt_data_row_record(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        let _timer = timer!("ael.envelope.decrypt");
        increment_counter("ael.envelope.decrypt.count");

        let parent = drr.key.parent_key_meta.as_ref().ok_or_else(|| {
            Error::MetadataMissing("data row record has no parent key meta".into())
        })?;

        if !self.partition.is_valid_intermediate_key_id(&parent.id) {
            return Err(Error::InvalidPartition(format!(
                "intermediate key {} does not belong to partition {}",
                parent.id,
                self.partition.partition_id()
            )));
        }

        let ik = self
            .manager
            .get_intermediate_key(self.partition.as_ref(), &self.ik_cache, parent)?;

        self.manager
            .cipher()
            .envelope_decrypt(&drr.data, &drr.key.encrypted_key, drr.key.created, &ik)
            .map_err(|e| e.context("decrypt"))
    }

    fn close(&self) -> Result<()> {
        self.ik_cache.dispose();
        Ok(())
    }
}
