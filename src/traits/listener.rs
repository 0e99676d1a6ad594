//! Listener trait for harvest events

use thiserror::Error;

use crate::resource::{DeletedResource, HarvestedResource};
use crate::traits::PersistenceError;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Listener failed: {0}")]
    Failed(String),
}

/// Receives the create/update/delete events a harvester detects.
///
/// Delivery is at-least-once: the same event may arrive again after a crash,
/// so implementations must tolerate duplicates.
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    /// Name used in logs and to scope persisted state
    fn name(&self) -> &str;

    async fn on_create(&self, resource: &HarvestedResource) -> Result<(), ListenerError>;

    async fn on_update(&self, resource: &HarvestedResource) -> Result<(), ListenerError>;

    /// Only the correlation id and location of a deleted resource are valid
    async fn on_delete(&self, resource: &DeletedResource) -> Result<(), ListenerError>;
}
