use crate::envelope::EnvelopeKeyRecord;
use crate::error::Result;
use crate::Metastore;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// An in-memory implementation of the Metastore trait
///
/// This implementation stores keys in memory, which is useful for testing
/// but should not be used in production as keys will be lost when the
/// process terminates.
#[derive(Debug, Default)]
pub struct InMemoryMetastore {
    /// id -> created -> record
    store: RwLock<HashMap<String, BTreeMap<i64, EnvelopeKeyRecord>>>,

    region_suffix: Option<String>,
}

impl InMemoryMetastore {
    /// Creates a new InMemoryMetastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a metastore that reports `suffix` as its key suffix, so partitions built
    /// against it get region-suffixed key ids.
    pub fn with_region_suffix(suffix: impl Into<String>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            region_suffix: Some(suffix.into()),
        }
    }

    /// Flags a stored key as revoked. Returns false if no such key exists.
    pub fn mark_revoked(&self, id: &str, created: i64) -> bool {
        let mut store = self.store.write();
        match store.get_mut(id).and_then(|versions| versions.get_mut(&created)) {
            Some(record) => {
                record.revoked = Some(true);
                true
            }
            None => false,
        }
    }

    /// Number of stored records across all ids
    pub fn len(&self) -> usize {
        self.store.read().values().map(BTreeMap::len).sum()
    }

    /// Whether nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Metastore for InMemoryMetastore {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.store.read();

        Ok(store
            .get(id)
            .and_then(|versions| versions.get(&created))
            .cloned())
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.store.read();

        Ok(store
            .get(id)
            .and_then(|versions| versions.values().next_back())
            .cloned())
    }

    fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool> {
        let mut store = self.store.write();

        let versions = store.entry(id.to_string()).or_default();
        if versions.contains_key(&created) {
            log::debug!("metastore already has {}:{}", id, created);
            return Ok(false);
        }

        versions.insert(created, envelope.clone());

        Ok(true)
    }

    fn key_suffix(&self) -> Option<String> {
        self.region_suffix.clone()
    }
}
