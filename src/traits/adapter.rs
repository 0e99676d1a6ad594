//! Adapter trait for the downstream catalog store

use thiserror::Error;

use crate::resource::HarvestedResource;

#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("Rejected by catalog: {0}")]
    Rejected(String),
    #[error("Resource content unavailable: {0}")]
    Unavailable(String),
    #[error("Transform failed: {0}")]
    Transform(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Trait for applying create/update/delete to the downstream store
///
/// No method may partially apply: either the downstream effect happened and
/// the returned id is usable, or an error is returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Create a downstream record, returning the id the store assigned
    async fn create(&self, resource: &HarvestedResource) -> Result<String, IngestError>;

    /// Update an existing record; the store may hand back a new id
    async fn update(
        &self,
        resource: &HarvestedResource,
        downstream_id: &str,
    ) -> Result<String, IngestError>;

    /// Delete a downstream record
    async fn delete(&self, downstream_id: &str) -> Result<(), IngestError>;
}
