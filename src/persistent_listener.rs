//! Listener that keeps the downstream catalog in sync, idempotently
//!
//! The correlation map (correlation id → downstream id) is the only record of
//! which downstream records exist. Every callback is a function of the event
//! and that map, so a redelivered event lands on the same end state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{persistence_key, DeletedResource, HarvestedResource};
use crate::traits::{Adapter, Listener, ListenerError, PersistenceError, PersistenceStore};

/// Namespace prefix for listener correlation maps
pub const PERSISTENT_NAMESPACE_PREFIX: &str = "harvest/persistent/";

/// One row of the correlation map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub downstream_id: String,
    pub location: String,
    pub recorded_at: DateTime<Utc>,
}

pub struct PersistentListener {
    name: String,
    adapter: Arc<dyn Adapter>,
    store: Arc<dyn PersistenceStore>,
}

impl PersistentListener {
    /// `store` should be scoped to [`PersistentListener::namespace_for`] of `name`
    pub fn new(name: &str, adapter: Arc<dyn Adapter>, store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            name: name.to_string(),
            adapter,
            store,
        }
    }

    /// Store namespace for a listener's correlation map
    pub fn namespace_for(name: &str) -> String {
        format!("{}{}", PERSISTENT_NAMESPACE_PREFIX, persistence_key(name))
    }

    /// Downstream id mapped to a correlation id, if any
    pub fn downstream_id(&self, correlation_id: &str) -> Result<Option<String>, ListenerError> {
        Ok(self.record(correlation_id)?.map(|r| r.downstream_id))
    }

    /// Number of downstream records this listener tracks
    pub fn mapped_count(&self) -> Result<usize, ListenerError> {
        Ok(self.store.list_keys()?.len())
    }

    fn record(&self, correlation_id: &str) -> Result<Option<CorrelationRecord>, ListenerError> {
        match self.store.load(correlation_id)? {
            None => Ok(None),
            Some(blob) => serde_json::from_slice(&blob)
                .map(Some)
                .map_err(|e| PersistenceError::CodecError(e.to_string()).into()),
        }
    }

    fn save(&self, correlation_id: &str, downstream_id: &str, location: &str) -> Result<(), ListenerError> {
        let record = CorrelationRecord {
            downstream_id: downstream_id.to_string(),
            location: location.to_string(),
            recorded_at: Utc::now(),
        };
        let blob = serde_json::to_vec(&record)
            .map_err(|e| PersistenceError::CodecError(e.to_string()))?;
        self.store.store(correlation_id, &blob)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Listener for PersistentListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_create(&self, resource: &HarvestedResource) -> Result<(), ListenerError> {
        let correlation_id = resource.correlation_id();
        if self.record(correlation_id)?.is_some() {
            tracing::debug!(
                listener = %self.name,
                correlation_id = %correlation_id,
                "Already created, ignoring duplicate"
            );
            return Ok(());
        }

        match self.adapter.create(resource).await {
            Ok(id) if !id.is_empty() => {
                self.save(correlation_id, &id, resource.location())?;
                tracing::info!(
                    listener = %self.name,
                    correlation_id = %correlation_id,
                    downstream_id = %id,
                    location = %resource.location(),
                    "Created downstream record"
                );
            }
            Ok(_) => {
                tracing::warn!(
                    listener = %self.name,
                    location = %resource.location(),
                    "Adapter returned an empty id, leaving unmapped"
                );
            }
            Err(e) => {
                tracing::warn!(
                    listener = %self.name,
                    location = %resource.location(),
                    error = %e,
                    "Create failed, will retry on redelivery"
                );
            }
        }
        Ok(())
    }

    async fn on_update(&self, resource: &HarvestedResource) -> Result<(), ListenerError> {
        let correlation_id = resource.correlation_id();
        let Some(existing) = self.record(correlation_id)? else {
            tracing::debug!(
                listener = %self.name,
                correlation_id = %correlation_id,
                "No record to update"
            );
            return Ok(());
        };

        match self.adapter.update(resource, &existing.downstream_id).await {
            Ok(id) if !id.is_empty() => {
                self.save(correlation_id, &id, resource.location())?;
                tracing::info!(
                    listener = %self.name,
                    correlation_id = %correlation_id,
                    downstream_id = %id,
                    "Updated downstream record"
                );
            }
            Ok(_) => {
                tracing::warn!(
                    listener = %self.name,
                    downstream_id = %existing.downstream_id,
                    "Adapter returned an empty id, keeping existing mapping"
                );
            }
            Err(e) => {
                tracing::warn!(
                    listener = %self.name,
                    downstream_id = %existing.downstream_id,
                    error = %e,
                    "Update failed, keeping existing mapping"
                );
            }
        }
        Ok(())
    }

    async fn on_delete(&self, resource: &DeletedResource) -> Result<(), ListenerError> {
        let correlation_id = resource.correlation_id.as_str();
        let Some(existing) = self.record(correlation_id)? else {
            tracing::debug!(
                listener = %self.name,
                correlation_id = %correlation_id,
                "No record to delete"
            );
            return Ok(());
        };

        match self.adapter.delete(&existing.downstream_id).await {
            Ok(()) => {
                self.store.delete(correlation_id)?;
                tracing::info!(
                    listener = %self.name,
                    correlation_id = %correlation_id,
                    downstream_id = %existing.downstream_id,
                    "Deleted downstream record"
                );
            }
            Err(e) => {
                tracing::warn!(
                    listener = %self.name,
                    downstream_id = %existing.downstream_id,
                    error = %e,
                    "Delete failed, keeping mapping"
                );
            }
        }
        Ok(())
    }
}
