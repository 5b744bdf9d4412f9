use std::fmt;

/// Trait for partition naming and validation
///
/// A partition is the naming authority for the key hierarchy: it derives the
/// metastore ids for the system key shared by a `(service, product)` pair and
/// the intermediate key owned by a single partition id.
pub trait Partition: Send + Sync + fmt::Debug {
    /// Returns the system key id for this partition
    fn system_key_id(&self) -> String;

    /// Returns the intermediate key id for this partition
    fn intermediate_key_id(&self) -> String;

    /// Checks if the given id is a valid intermediate key id for this
    /// partition
    fn is_valid_intermediate_key_id(&self, id: &str) -> bool;
}

/// Default implementation of the Partition trait
#[derive(Debug, Clone)]
pub struct DefaultPartition {
    id: String,
    service: String,
    product: String,
}

impl DefaultPartition {
    /// Creates a new DefaultPartition
    pub fn new(
        partition_id: impl Into<String>,
        service: impl Into<String>,
        product: impl Into<String>,
    ) -> Self {
        Self {
            id: partition_id.into(),
            service: service.into(),
            product: product.into(),
        }
    }

    /// Returns the partition id
    pub fn partition_id(&self) -> &str {
        &self.id
    }
}

impl Partition for DefaultPartition {
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
