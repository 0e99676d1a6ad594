//! Harvester registry - matches harvesters and listeners by configured id
//!
//! Harvesters and listeners come and go independently. Whichever side shows
//! up second gets attached to the first, so registration order never matters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::harvester::Harvester;
use crate::traits::Listener;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Harvester already registered: {0}")]
    DuplicateHarvester(String),
    #[error("Harvester not found: {0}")]
    HarvesterNotFound(String),
}

struct WatchingListener {
    watch: String,
    listener: Arc<dyn Listener>,
}

#[derive(Default)]
struct Bindings {
    harvesters: HashMap<String, Arc<Harvester>>,
    listeners: Vec<WatchingListener>,
}

/// In-process registry performing symmetric catch-up matching
#[derive(Default)]
pub struct HarvesterRegistry {
    bindings: Mutex<Bindings>,
}

fn attach(harvester: &Harvester, listener: &Arc<dyn Listener>) -> bool {
    match harvester.register_listener(Arc::clone(listener)) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                harvester_id = %harvester.id(),
                listener = %listener.name(),
                error = %e,
                "Could not attach listener"
            );
            false
        }
    }
}

impl HarvesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn bindings(&self) -> MutexGuard<'_, Bindings> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a harvester and attach every listener already watching its id.
    /// Returns how many listeners were attached.
    pub fn add_harvester(&self, harvester: Arc<Harvester>) -> Result<usize, RegistryError> {
        let mut bindings = self.bindings();
        let id = harvester.id().to_string();
        if bindings.harvesters.contains_key(&id) {
            return Err(RegistryError::DuplicateHarvester(id));
        }

        let attached = bindings
            .listeners
            .iter()
            .filter(|w| w.watch == id)
            .filter(|w| attach(&harvester, &w.listener))
            .count();

        tracing::info!(harvester_id = %id, attached, "Harvester registered");
        bindings.harvesters.insert(id, harvester);
        Ok(attached)
    }

    /// Remove a harvester and detach every listener the registry attached to it
    pub fn remove_harvester(&self, id: &str) -> Result<Arc<Harvester>, RegistryError> {
        let mut bindings = self.bindings();
        let harvester = bindings
            .harvesters
            .remove(id)
            .ok_or_else(|| RegistryError::HarvesterNotFound(id.to_string()))?;

        for watching in bindings.listeners.iter().filter(|w| w.watch == id) {
            harvester.unregister_listener(&watching.listener);
        }

        tracing::info!(harvester_id = %id, "Harvester unregistered");
        Ok(harvester)
    }

    /// Register a listener watching harvester `watch` and attach it if that
    /// harvester is already known. Returns whether it was attached.
    pub fn add_listener(&self, watch: &str, listener: Arc<dyn Listener>) -> bool {
        let mut bindings = self.bindings();
        let attached = bindings
            .harvesters
            .get(watch)
            .map(|h| attach(h, &listener))
            .unwrap_or(false);

        tracing::info!(listener = %listener.name(), watch = %watch, attached, "Listener registered");
        bindings.listeners.push(WatchingListener {
            watch: watch.to_string(),
            listener,
        });
        attached
    }

    /// Remove a listener and detach it from its harvester. Listeners the
    /// harvester rejected earlier get another chance to attach.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        let mut bindings = self.bindings();
        let target = Arc::as_ptr(listener) as *const ();
        let Some(index) = bindings
            .listeners
            .iter()
            .position(|w| Arc::as_ptr(&w.listener) as *const () == target)
        else {
            return false;
        };

        let watching = bindings.listeners.remove(index);
        if let Some(harvester) = bindings.harvesters.get(&watching.watch) {
            if harvester.unregister_listener(&watching.listener) {
                let attached = bindings
                    .listeners
                    .iter()
                    .filter(|w| w.watch == watching.watch && !harvester.has_listener(&w.listener))
                    .filter(|w| attach(harvester, &w.listener))
                    .count();
                if attached > 0 {
                    tracing::info!(harvester_id = %harvester.id(), attached, "Attached pending listeners");
                }
            }
        }
        tracing::info!(listener = %listener.name(), watch = %watching.watch, "Listener unregistered");
        true
    }

    pub fn harvester(&self, id: &str) -> Option<Arc<Harvester>> {
        self.bindings().harvesters.get(id).cloned()
    }

    /// All registered harvesters, ordered by id
    pub fn harvesters(&self) -> Vec<Arc<Harvester>> {
        let mut harvesters: Vec<_> = self.bindings().harvesters.values().cloned().collect();
        harvesters.sort_by(|a, b| a.id().cmp(b.id()));
        harvesters
    }
}
