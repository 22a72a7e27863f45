use crate::envelope::DataRowRecord;
use crate::error::Result;
use crate::{Loader, Storer};

use std::marker::PhantomData;

/// Adapts a closure into a [`Loader`]
pub struct LoaderFn<K, F> {
    f: F,
    _key: PhantomData<fn(&K)>,
}

impl<K, F> LoaderFn<K, F>
where
    F: Fn(&K) -> Result<Option<DataRowRecord>> + Send + Sync,
{
    /// Wraps `f`
    pub fn new(f: F) -> Self {
        Self { f, _key: PhantomData }
    }
}

impl<K, F> Loader for LoaderFn<K, F>
where
    F: Fn(&K) -> Result<Option<DataRowRecord>> + Send + Sync,
    K: Send + Sync,
{
    type Key = K;

    fn load(&self, key: &Self::Key) -> Result<Option<DataRowRecord>> {
        (self.f)(key)
    }
}

/// Adapts a closure into a [`Storer`]
pub struct StorerFn<K, F> {
    f: F,
    _key: PhantomData<fn() -> K>,
}

impl<K, F> StorerFn<K, F>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
{
    /// Wraps `f`
    pub fn new(f: F) -> Self {
        Self { f, _key: PhantomData }
    }
}

impl<K, F> Storer for StorerFn<K, F>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
{
    type Key = K;

    fn store(&self, drr: &DataRowRecord) -> Result<Self::Key> {
        (self.f)(drr)
    }
}
