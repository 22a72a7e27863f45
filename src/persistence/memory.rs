use crate::envelope::DataRowRecord;
use crate::error::Result;
use crate::{Loader, Storer};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps data row records in a map, keyed by a generated id
///
/// Meant for tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    rows: RwLock<HashMap<String, DataRowRecord>>,
    next_id: AtomicU64,
}

impl InMemoryPersistence {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storer for InMemoryPersistence {
    type Key = String;

    fn store(&self, drr: &DataRowRecord) -> Result<String> {
        let key = format!("drr-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.rows.write().insert(key.clone(), drr.clone());
        Ok(key)
    }
}

impl Loader for InMemoryPersistence {
    type Key = String;

    fn load(&self, key: &String) -> Result<Option<DataRowRecord>> {
        Ok(self.rows.read().get(key).cloned())
    }
}
