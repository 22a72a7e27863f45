use crate::error::{Error, Result};
use std::fmt;

/// Derives the key ids used for one partition
///
/// A system key id is shared by every partition of a service/product. The intermediate
/// key id is unique to the partition.
pub trait Partition: Send + Sync + fmt::Debug {
    /// The partition (tenant, user, shard...) this instance names keys for
    fn partition_id(&self) -> &str;

    /// Service the keys belong to
    fn service_id(&self) -> &str;

    /// Product the keys belong to
    fn product_id(&self) -> &str;

    /// Returns the system key ID for this partition
    fn system_key_id(&self) -> String;

    /// Returns the intermediate key ID for this partition
    fn intermediate_key_id(&self) -> String;

    /// Checks if the given ID is a valid intermediate key ID for this partition
    fn is_valid_intermediate_key_id(&self, id: &str) -> bool;
}

fn require(name: &str, value: String) -> Result<String> {
    if value.is_empty() {
        return Err(Error::Config(format!("{} must not be empty", name)));
    }
    Ok(value)
}

/// Partition whose key ids carry no suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPartition {
    id: String,
    service: String,
    product: String,
}

impl DefaultPartition {
    /// Creates a new DefaultPartition. Every component must be non-empty.
    pub fn new(
        partition_id: impl Into<String>,
        service: impl Into<String>,
        product: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            id: require("partition id", partition_id.into())?,
            service: require("service id", service.into())?,
            product: require("product id", product.into())?,
        })
    }
}

impl Partition for DefaultPartition {
    fn partition_id(&self) -> &str {
        &self.id
    }

    fn service_id(&self) -> &str {
        &self.service
    }

    fn product_id(&self) -> &str {
        &self.product
    }

    fn system_key_id(&self) -> String {
        format!("_SK_{}_{}", self.service, self.product)
    }

    fn intermediate_key_id(&self) -> String {
        format!("_IK_{}_{}_{}", self.id, self.service, self.product)
    }

    fn is_valid_intermediate_key_id(&self, id: &str) -> bool {
        id == self.intermediate_key_id()
    }
}

/// Partition whose key ids end in a region (or other) suffix
///
/// Records written before the suffix was introduced, or by another region, still decrypt:
/// any intermediate key id that starts with the unsuffixed id is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixedPartition {
    inner: DefaultPartition,
    suffix: String,
}

impl SuffixedPartition {
    /// Creates a new SuffixedPartition
    pub fn new(
        partition_id: impl Into<String>,
        service: impl Into<String>,
        product: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            inner: DefaultPartition::new(partition_id, service, product)?,
            suffix: require("suffix", suffix.into())?,
        })
    }

    /// The suffix appended to key ids
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl Partition for SuffixedPartition {
    fn partition_id(&self) -> &str {
        self.inner.partition_id()
    }

    fn service_id(&self) -> &str {
        self.inner.service_id()
    }

    fn product_id(&self) -> &str {
        self.inner.product_id()
    }

    fn system_key_id(&self) -> String {
        format!("{}_{}", self.inner.system_key_id(), self.suffix)
    }

    fn intermediate_key_id(&self) -> String {
        format!("{}_{}", self.inner.intermediate_key_id(), self.suffix)
    }

    fn is_valid_intermediate_key_id(&self, id: &str) -> bool {
        id == self.intermediate_key_id() || id.starts_with(&self.inner.intermediate_key_id())
    }
}
