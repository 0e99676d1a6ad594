//! Test doubles for dependency injection
//!
//! Provides in-memory implementations of all external dependencies for isolated testing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::observer::ChangeKind;
use crate::resource::{ContentError, DeletedResource, HarvestedResource, ResourceContent};
use crate::snapshot::{Fingerprint, ListingEntry};
use crate::traits::{
    Adapter, IngestError,
    Listener, ListenerError,
    ListerError, TreeLister,
    PersistenceError, PersistenceStore,
};

// ============================================================================
// InMemoryStore
// ============================================================================

/// In-memory persistence store for testing
///
/// Clones share the same map, so a test can "restart" a component by building
/// a new one over a clone of the store.
#[derive(Clone)]
pub struct InMemoryStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(Mutex::new(BTreeMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent `store`/`delete` fail (simulates a crash before persisting)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::DatabaseError("simulated write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceStore for InMemoryStore {
    fn store(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.blobs.lock().unwrap().insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        self.check_writable()?;
        Ok(self.blobs.lock().unwrap().remove(key).is_some())
    }

    fn list_keys(&self) -> Result<BTreeSet<String>, PersistenceError> {
        Ok(self.blobs.lock().unwrap().keys().cloned().collect())
    }
}

// ============================================================================
// StaticTreeLister
// ============================================================================

#[derive(Default)]
struct StaticTree {
    files: BTreeMap<String, (Fingerprint, Vec<u8>)>,
    unreachable: bool,
    invalid_root: bool,
    list_calls: usize,
}

/// Scripted tree lister for testing
///
/// Tests put and remove files directly; `locate` joins root and path with `/`.
#[derive(Clone, Default)]
pub struct StaticTreeLister {
    tree: Arc<Mutex<StaticTree>>,
}

impl StaticTreeLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file; the fingerprint is (byte length, `modified_ms`)
    pub fn put(&self, path: &str, bytes: &[u8], modified_ms: i64) {
        let fingerprint = Fingerprint::new(bytes.len() as u64, modified_ms);
        self.tree
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (fingerprint, bytes.to_vec()));
    }

    pub fn remove(&self, path: &str) {
        self.tree.lock().unwrap().files.remove(path);
    }

    /// Simulate a network outage
    pub fn set_unreachable(&self, unreachable: bool) {
        self.tree.lock().unwrap().unreachable = unreachable;
    }

    /// Make `check_root` reject the root
    pub fn set_invalid_root(&self, invalid: bool) {
        self.tree.lock().unwrap().invalid_root = invalid;
    }

    /// Number of times `list` was called
    pub fn list_calls(&self) -> usize {
        self.tree.lock().unwrap().list_calls
    }
}

#[async_trait]
impl TreeLister for StaticTreeLister {
    async fn check_root(&self, root: &str) -> Result<(), ListerError> {
        if self.tree.lock().unwrap().invalid_root {
            return Err(ListerError::InvalidRoot {
                root: root.to_string(),
                reason: "does not exist".to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self, root: &str) -> Result<Vec<ListingEntry>, ListerError> {
        let mut tree = self.tree.lock().unwrap();
        tree.list_calls += 1;
        if tree.unreachable {
            return Err(ListerError::Unreachable(root.to_string()));
        }
        Ok(tree
            .files
            .iter()
            .map(|(path, (fingerprint, _))| ListingEntry::new(path.clone(), *fingerprint))
            .collect())
    }

    fn locate(&self, root: &str, path: &str) -> String {
        format!("{}/{}", root, path)
    }

    async fn fetch(&self, location: &str) -> Result<ResourceContent, ContentError> {
        let tree = self.tree.lock().unwrap();
        tree.files
            .iter()
            .filter(|(path, _)| {
                location
                    .strip_suffix(path.as_str())
                    .is_some_and(|rest| rest.ends_with('/'))
            })
            .max_by_key(|(path, _)| path.len())
            .map(|(path, (_, bytes))| {
                let name = path.rsplit('/').next().unwrap_or(path);
                ResourceContent::new(name, bytes.clone())
            })
            .ok_or_else(|| ContentError::Unavailable(location.to_string()))
    }
}

// ============================================================================
// RecordingAdapter
// ============================================================================

/// Adapter call log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Create { location: String },
    Update { location: String, downstream_id: String },
    Delete { downstream_id: String },
}

/// Configurable adapter behavior for testing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterBehavior {
    Succeed,
    FailCreate,
    FailUpdate,
    FailDelete,
    /// Updates succeed but hand back a freshly issued id
    ReissueIdOnUpdate,
}

/// In-memory downstream catalog that records every call
#[derive(Clone)]
pub struct RecordingAdapter {
    calls: Arc<Mutex<Vec<AdapterCall>>>,
    records: Arc<Mutex<HashMap<String, String>>>,
    behavior: Arc<Mutex<AdapterBehavior>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::with_behavior(AdapterBehavior::Succeed)
    }

    pub fn with_behavior(behavior: AdapterBehavior) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            records: Arc::new(Mutex::new(HashMap::new())),
            behavior: Arc::new(Mutex::new(behavior)),
        }
    }

    pub fn set_behavior(&self, behavior: AdapterBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, AdapterCall::Create { .. }))
    }

    pub fn update_count(&self) -> usize {
        self.count(|c| matches!(c, AdapterCall::Update { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, AdapterCall::Delete { .. }))
    }

    /// Downstream records currently alive, keyed by id
    pub fn records(&self) -> HashMap<String, String> {
        self.records.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&AdapterCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn behavior(&self) -> AdapterBehavior {
        *self.behavior.lock().unwrap()
    }
}

impl Default for RecordingAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for RecordingAdapter {
    async fn create(&self, resource: &HarvestedResource) -> Result<String, IngestError> {
        self.calls.lock().unwrap().push(AdapterCall::Create {
            location: resource.location().to_string(),
        });
        if self.behavior() == AdapterBehavior::FailCreate {
            return Err(IngestError::Storage("simulated create failure".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.records
            .lock()
            .unwrap()
            .insert(id.clone(), resource.location().to_string());
        Ok(id)
    }

    async fn update(
        &self,
        resource: &HarvestedResource,
        downstream_id: &str,
    ) -> Result<String, IngestError> {
        self.calls.lock().unwrap().push(AdapterCall::Update {
            location: resource.location().to_string(),
            downstream_id: downstream_id.to_string(),
        });
        let behavior = self.behavior();
        if behavior == AdapterBehavior::FailUpdate {
            return Err(IngestError::Storage("simulated update failure".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        if records.remove(downstream_id).is_none() {
            return Err(IngestError::Rejected(format!("no record {}", downstream_id)));
        }
        let id = if behavior == AdapterBehavior::ReissueIdOnUpdate {
            uuid::Uuid::new_v4().to_string()
        } else {
            downstream_id.to_string()
        };
        records.insert(id.clone(), resource.location().to_string());
        Ok(id)
    }

    async fn delete(&self, downstream_id: &str) -> Result<(), IngestError> {
        self.calls.lock().unwrap().push(AdapterCall::Delete {
            downstream_id: downstream_id.to_string(),
        });
        if self.behavior() == AdapterBehavior::FailDelete {
            return Err(IngestError::Storage("simulated delete failure".to_string()));
        }
        match self.records.lock().unwrap().remove(downstream_id) {
            Some(_) => Ok(()),
            None => Err(IngestError::Rejected(format!("no record {}", downstream_id))),
        }
    }
}

// ============================================================================
// RecordingListener
// ============================================================================

/// One event seen by a [`RecordingListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: ChangeKind,
    pub correlation_id: String,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerBehavior {
    Succeed,
    Fail,
    Panic,
}

/// Listener that records what it receives
///
/// Failing and panicking modes still record the event first, so tests can
/// assert that delivery was attempted.
#[derive(Clone)]
pub struct RecordingListener {
    name: String,
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    behavior: Arc<Mutex<ListenerBehavior>>,
}

impl RecordingListener {
    pub fn new(name: &str) -> Self {
        Self::with_behavior(name, ListenerBehavior::Succeed)
    }

    pub fn with_behavior(name: &str, behavior: ListenerBehavior) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Mutex::new(behavior)),
        }
    }

    pub fn set_behavior(&self, behavior: ListenerBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn record(&self, kind: ChangeKind, correlation_id: &str, location: &str) -> Result<(), ListenerError> {
        self.events.lock().unwrap().push(RecordedEvent {
            kind,
            correlation_id: correlation_id.to_string(),
            location: location.to_string(),
        });
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            ListenerBehavior::Succeed => Ok(()),
            ListenerBehavior::Fail => Err(ListenerError::Failed(format!("{} refused {}", self.name, location))),
            ListenerBehavior::Panic => panic!("{} blew up on {}", self.name, location),
        }
    }
}

#[async_trait]
impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_create(&self, resource: &HarvestedResource) -> Result<(), ListenerError> {
        self.record(ChangeKind::Created, resource.correlation_id(), resource.location())
    }

    async fn on_update(&self, resource: &HarvestedResource) -> Result<(), ListenerError> {
        self.record(ChangeKind::Modified, resource.correlation_id(), resource.location())
    }

    async fn on_delete(&self, resource: &DeletedResource) -> Result<(), ListenerError> {
        self.record(ChangeKind::Deleted, &resource.correlation_id, &resource.location)
    }
}
