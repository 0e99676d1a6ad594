//! Harvester: polls one resource tree and dispatches change events
//!
//! A harvester does not own time. The scheduler calls [`Harvester::poll`] once
//! per interval, and the per-harvester cycle lock keeps two polls (or a poll
//! and a reconfiguration) from overlapping.
//!
//! The snapshot is persisted only after every event of a cycle has been
//! dispatched. A crash in between makes the next poll redeliver the same
//! events against the old snapshot.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{ConfigError, HarvesterConfig, ListenerPolicy};
use crate::observer::{ChangeEvent, ChangeKind, Observer};
use crate::resource::{persistence_key, ContentAccessor, DeletedResource, HarvestedResource, Properties};
use crate::snapshot::{SnapshotError, TreeSnapshot};
use crate::traits::{Listener, ListenerError, ListerError, PersistenceError, PersistenceStore, TreeLister};

/// Namespace harvesters keep their snapshots under
pub const SNAPSHOT_NAMESPACE: &str = "harvest/snapshot";

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Lister error: {0}")]
    Lister(#[from] ListerError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Harvester {0} is not running")]
    NotRunning(String),
    #[error("Harvester {harvester} rejected listener {listener}: {reason}")]
    ListenerRejected {
        harvester: String,
        listener: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvesterStatus {
    Stopped,
    Initializing,
    Polling,
}

/// Outcome of one poll cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Listener callbacks that returned an error or panicked
    pub listener_failures: usize,
    /// No listeners were registered, so nothing was listed
    pub idle: bool,
}

impl PollReport {
    pub fn events(&self) -> usize {
        self.created + self.modified + self.deleted
    }
}

struct ListenerSet {
    policy: ListenerPolicy,
    members: Vec<Arc<dyn Listener>>,
}

/// State only touched while holding the cycle lock
struct Cycle {
    config: HarvesterConfig,
    snapshot_key: String,
    snapshot: Option<TreeSnapshot>,
    properties: Properties,
}

pub struct Harvester {
    id: String,
    lister: Arc<dyn TreeLister>,
    store: Arc<dyn PersistenceStore>,
    listeners: RwLock<ListenerSet>,
    cycle: tokio::sync::Mutex<Cycle>,
    status: Mutex<HarvesterStatus>,
    poll_interval: watch::Sender<Duration>,
}

fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Harvester {
    /// Create a stopped harvester. Call [`Harvester::start`] before polling.
    pub fn new(
        config: HarvesterConfig,
        lister: Arc<dyn TreeLister>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        let snapshot_key = persistence_key(&config.root);
        let (poll_interval, _) = watch::channel(config.poll_interval);
        Self {
            id: config.id.clone(),
            lister,
            store,
            listeners: RwLock::new(ListenerSet {
                policy: config.listener_policy,
                members: Vec::new(),
            }),
            cycle: tokio::sync::Mutex::new(Cycle {
                config,
                snapshot_key,
                snapshot: None,
                properties: Properties::new(),
            }),
            status: Mutex::new(HarvesterStatus::Stopped),
            poll_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> HarvesterStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: HarvesterStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval.borrow()
    }

    /// Watch the configured poll interval; changes on [`Harvester::reconfigure`]
    pub fn subscribe_poll_interval(&self) -> watch::Receiver<Duration> {
        self.poll_interval.subscribe()
    }

    /// Current configuration (waits for an in-flight poll)
    pub async fn config(&self) -> HarvesterConfig {
        self.cycle.lock().await.config.clone()
    }

    /// Validate the root and load the persisted snapshot
    pub async fn start(&self) -> Result<(), HarvestError> {
        let mut cycle = self.cycle.lock().await;
        if self.status() == HarvesterStatus::Polling {
            return Ok(());
        }
        self.initialize(&mut cycle).await
    }

    /// Stop polling; waits for an in-flight poll to finish
    pub async fn stop(&self) {
        let mut cycle = self.cycle.lock().await;
        cycle.snapshot = None;
        self.set_status(HarvesterStatus::Stopped);
        tracing::info!(harvester_id = %self.id, "Harvester stopped");
    }

    /// Tear down and re-initialize with a new configuration.
    ///
    /// Waits for an in-flight poll. A new root means a new persistence key,
    /// so the new tree is harvested from scratch.
    pub async fn reconfigure(&self, config: HarvesterConfig) -> Result<(), HarvestError> {
        if config.id != self.id {
            return Err(ConfigError::InvalidValue {
                key: "id".to_string(),
                value: config.id,
            }
            .into());
        }
        config.validate()?;

        let mut cycle = self.cycle.lock().await;
        {
            let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
            if config.listener_policy == ListenerPolicy::Single && listeners.members.len() > 1 {
                return Err(ConfigError::InvalidValue {
                    key: format!("harvester.{}.listener_policy", self.id),
                    value: ListenerPolicy::Single.as_str().to_string(),
                }
                .into());
            }
            listeners.policy = config.listener_policy;
        }

        self.set_status(HarvesterStatus::Stopped);
        tracing::info!(
            harvester_id = %self.id,
            old_root = %cycle.config.root,
            new_root = %config.root,
            "Reconfiguring harvester"
        );
        let interval = config.poll_interval;
        cycle.config = config;
        cycle.snapshot = None;
        self.poll_interval.send_if_modified(|current| {
            let changed = *current != interval;
            *current = interval;
            changed
        });
        self.initialize(&mut cycle).await
    }

    async fn initialize(&self, cycle: &mut Cycle) -> Result<(), HarvestError> {
        self.set_status(HarvesterStatus::Initializing);
        match self.load_state(cycle).await {
            Ok(()) => {
                self.set_status(HarvesterStatus::Polling);
                tracing::info!(
                    harvester_id = %self.id,
                    root = %cycle.config.root,
                    known_paths = cycle.snapshot.as_ref().map(TreeSnapshot::len).unwrap_or(0),
                    "Harvester started"
                );
                Ok(())
            }
            Err(e) => {
                self.set_status(HarvesterStatus::Stopped);
                tracing::error!(harvester_id = %self.id, error = %e, "Harvester failed to start");
                Err(e)
            }
        }
    }

    async fn load_state(&self, cycle: &mut Cycle) -> Result<(), HarvestError> {
        cycle.config.validate()?;
        self.lister.check_root(&cycle.config.root).await?;

        cycle.snapshot_key = persistence_key(&cycle.config.root);
        cycle.properties = cycle.config.attribute_overrides.to_properties();
        cycle.snapshot = match self.store.load(&cycle.snapshot_key)? {
            None => None,
            Some(blob) => match TreeSnapshot::decode(&blob) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(
                        harvester_id = %self.id,
                        error = %e,
                        "Discarding unreadable snapshot, harvesting from scratch"
                    );
                    None
                }
            },
        };
        Ok(())
    }

    /// Add a listener. Registering the same listener twice is a no-op.
    pub fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), HarvestError> {
        let mut set = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if set.members.iter().any(|m| same_listener(m, &listener)) {
            tracing::debug!(harvester_id = %self.id, listener = %listener.name(), "Listener already registered");
            return Ok(());
        }
        if set.policy == ListenerPolicy::Single && !set.members.is_empty() {
            return Err(HarvestError::ListenerRejected {
                harvester: self.id.clone(),
                listener: listener.name().to_string(),
                reason: "only one listener is allowed".to_string(),
            });
        }
        tracing::info!(harvester_id = %self.id, listener = %listener.name(), "Listener registered");
        set.members.push(listener);
        Ok(())
    }

    /// Remove a listener, returning whether it was registered
    pub fn unregister_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        let mut set = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = set.members.len();
        set.members.retain(|m| !same_listener(m, listener));
        let removed = set.members.len() != before;
        if removed {
            tracing::info!(harvester_id = %self.id, listener = %listener.name(), "Listener unregistered");
        }
        removed
    }

    pub fn has_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .iter()
            .any(|m| same_listener(m, listener))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).members.len()
    }

    /// Run one poll cycle: list, diff, dispatch, then persist the snapshot.
    ///
    /// An unreachable tree, a listener that could not persist its own state,
    /// or a failed snapshot write abandons the cycle. The in-memory snapshot
    /// only advances once the new one is persisted.
    pub async fn poll(&self) -> Result<PollReport, HarvestError> {
        let mut cycle = self.cycle.lock().await;
        if self.status() != HarvesterStatus::Polling {
            return Err(HarvestError::NotRunning(self.id.clone()));
        }

        let listeners: Vec<Arc<dyn Listener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .clone();

        if listeners.is_empty() && cycle.config.idle_without_listeners {
            tracing::debug!(harvester_id = %self.id, "No listeners, skipping poll");
            return Ok(PollReport {
                idle: true,
                ..PollReport::default()
            });
        }

        let root = cycle.config.root.clone();
        let listing = self.lister.list(&root).await.map_err(|e| {
            tracing::error!(harvester_id = %self.id, root = %root, error = %e, "Listing failed, abandoning poll");
            HarvestError::from(e)
        })?;

        let diff = Observer::diff(cycle.snapshot.as_ref(), listing);
        let mut report = PollReport {
            created: diff.count(ChangeKind::Created),
            modified: diff.count(ChangeKind::Modified),
            deleted: diff.count(ChangeKind::Deleted),
            ..PollReport::default()
        };

        for event in &diff.events {
            report.listener_failures += self
                .dispatch(event, &root, &cycle.properties, &listeners)
                .await?;
        }

        if report.events() == 0 && cycle.snapshot.is_some() {
            return Ok(report);
        }

        let blob = diff.next.encode()?;
        if let Err(e) = self.store.store(&cycle.snapshot_key, &blob) {
            tracing::error!(harvester_id = %self.id, error = %e, "Failed to persist snapshot, events will be redelivered");
            return Err(e.into());
        }
        cycle.snapshot = Some(diff.next);

        if report.events() > 0 {
            tracing::info!(
                harvester_id = %self.id,
                created = report.created,
                modified = report.modified,
                deleted = report.deleted,
                listener_failures = report.listener_failures,
                "Poll cycle complete"
            );
        }
        Ok(report)
    }

    /// Deliver one event to every listener in turn, returning the failure count.
    /// Stops at the first listener persistence failure.
    async fn dispatch(
        &self,
        event: &ChangeEvent,
        root: &str,
        properties: &Properties,
        listeners: &[Arc<dyn Listener>],
    ) -> Result<usize, HarvestError> {
        let location = self.lister.locate(root, &event.path);
        let mut failures = 0;

        match event.kind {
            ChangeKind::Deleted => {
                let resource = DeletedResource::new(location);
                for listener in listeners {
                    let outcome = AssertUnwindSafe(listener.on_delete(&resource))
                        .catch_unwind()
                        .await;
                    if !self.check_outcome(listener.name(), event, &resource.correlation_id, outcome)? {
                        failures += 1;
                    }
                }
            }
            ChangeKind::Created | ChangeKind::Modified => {
                let accessor = self.content_accessor(location.clone());
                let resource = HarvestedResource::new(location, properties.clone(), accessor);
                for listener in listeners {
                    let call = if event.kind == ChangeKind::Created {
                        listener.on_create(&resource)
                    } else {
                        listener.on_update(&resource)
                    };
                    let outcome = AssertUnwindSafe(call).catch_unwind().await;
                    if !self.check_outcome(listener.name(), event, resource.correlation_id(), outcome)? {
                        failures += 1;
                    }
                }
            }
        }
        Ok(failures)
    }

    fn content_accessor(&self, location: String) -> ContentAccessor {
        let lister = Arc::clone(&self.lister);
        ContentAccessor::new(move || {
            let lister = Arc::clone(&lister);
            let location = location.clone();
            async move { lister.fetch(&location).await }.boxed()
        })
    }

    fn check_outcome(
        &self,
        listener: &str,
        event: &ChangeEvent,
        correlation_id: &str,
        outcome: Result<Result<(), ListenerError>, Box<dyn Any + Send>>,
    ) -> Result<bool, HarvestError> {
        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(
                    harvester_id = %self.id,
                    listener = %listener,
                    kind = ?event.kind,
                    path = %event.path,
                    "Event dispatched"
                );
                Ok(true)
            }
            Ok(Err(ListenerError::Persistence(e))) => {
                tracing::error!(
                    harvester_id = %self.id,
                    listener = %listener,
                    correlation_id = %correlation_id,
                    kind = ?event.kind,
                    error = %e,
                    "Listener could not persist its state, abandoning poll"
                );
                Err(e.into())
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    harvester_id = %self.id,
                    listener = %listener,
                    correlation_id = %correlation_id,
                    kind = ?event.kind,
                    error = %e,
                    "Listener failed"
                );
                Ok(false)
            }
            Err(payload) => {
                tracing::warn!(
                    harvester_id = %self.id,
                    listener = %listener,
                    correlation_id = %correlation_id,
                    kind = ?event.kind,
                    panic = %panic_message(&*payload),
                    "Listener panicked"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{InMemoryStore, ListenerBehavior, RecordingAdapter, RecordingListener, StaticTreeLister};
    use crate::persistent_listener::PersistentListener;
    use crate::traits::{MockPersistenceStore, MockTreeLister};

    const ROOT: &str = "/data/docs";

    fn harvester_with(config: HarvesterConfig, lister: &StaticTreeLister, store: &InMemoryStore) -> Harvester {
        Harvester::new(config, Arc::new(lister.clone()), Arc::new(store.clone()))
    }

    async fn started(lister: &StaticTreeLister, store: &InMemoryStore) -> Harvester {
        let harvester = harvester_with(HarvesterConfig::new("docs", ROOT), lister, store);
        harvester.start().await.unwrap();
        harvester
    }

    fn listener(name: &str) -> (RecordingListener, Arc<dyn Listener>) {
        let recording = RecordingListener::new(name);
        let shared: Arc<dyn Listener> = Arc::new(recording.clone());
        (recording, shared)
    }

    #[tokio::test]
    async fn test_start_and_first_poll_creates_everything() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        lister.put("b.txt", b"bbb", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();

        let report = harvester.poll().await.unwrap();

        assert_eq!(harvester.status(), HarvesterStatus::Polling);
        assert_eq!(report.created, 2);
        assert_eq!(recording.count(ChangeKind::Created), 2);
        assert!(store.contains(&persistence_key(ROOT)));
    }

    #[tokio::test]
    async fn test_second_poll_only_reports_changes() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        lister.put("b.txt", b"bbb", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();
        harvester.poll().await.unwrap();
        recording.clear();

        lister.put("b.txt", b"bbbb", 2);
        lister.remove("a.txt");
        lister.put("c.txt", b"c", 1);
        let report = harvester.poll().await.unwrap();

        assert_eq!((report.created, report.modified, report.deleted), (1, 1, 1));
        let kinds: Vec<_> = recording.events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Deleted, ChangeKind::Modified, ChangeKind::Created]);
    }

    #[tokio::test]
    async fn test_events_carry_location_and_overrides() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let config = HarvesterConfig::new("docs", "/data/docs/")
            .with_attribute_overrides(["title=Fixed"])
            .unwrap();
        let harvester = harvester_with(config, &lister, &store);
        harvester.start().await.unwrap();
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();

        harvester.poll().await.unwrap();

        let event = &recording.events()[0];
        assert_eq!(event.location, "/data/docs/a.txt");
        assert_eq!(event.correlation_id, crate::resource::correlation_id("/data/docs/a.txt"));
        assert!(!harvester.cycle.lock().await.properties.is_empty());
    }

    #[tokio::test]
    async fn test_restart_resumes_from_persisted_snapshot() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        {
            let harvester = started(&lister, &store).await;
            let (_, shared) = listener("l1");
            harvester.register_listener(shared).unwrap();
            harvester.poll().await.unwrap();
        }

        let harvester = started(&lister, &store).await;
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();
        let report = harvester.poll().await.unwrap();

        assert_eq!(report.events(), 0);
        assert!(recording.events().is_empty());
    }

    #[tokio::test]
    async fn test_trailing_slash_shares_snapshot() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let first = started(&lister, &store).await;
        let (_, shared) = listener("l1");
        first.register_listener(shared).unwrap();
        first.poll().await.unwrap();

        let second = harvester_with(HarvesterConfig::new("docs", "/data/docs/"), &lister, &store);
        second.start().await.unwrap();
        let (recording, shared) = listener("l2");
        second.register_listener(shared).unwrap();
        second.poll().await.unwrap();

        assert!(recording.events().is_empty());
    }

    #[tokio::test]
    async fn test_crash_before_persist_redelivers() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();

        store.set_fail_writes(true);
        assert!(matches!(harvester.poll().await, Err(HarvestError::Persistence(_))));
        store.set_fail_writes(false);
        harvester.poll().await.unwrap();

        assert_eq!(recording.count(ChangeKind::Created), 2);
        assert_eq!(harvester.poll().await.unwrap().events(), 0);
    }

    #[tokio::test]
    async fn test_listener_store_failure_abandons_cycle() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let snapshots = InMemoryStore::new();
        let harvester = started(&lister, &snapshots).await;
        let adapter = RecordingAdapter::new();
        let mapping = InMemoryStore::new();
        let persistent = Arc::new(PersistentListener::new(
            "catalog",
            Arc::new(adapter.clone()),
            Arc::new(mapping.clone()),
        ));
        harvester.register_listener(persistent.clone()).unwrap();

        mapping.set_fail_writes(true);
        assert!(matches!(harvester.poll().await, Err(HarvestError::Persistence(_))));
        assert!(snapshots.is_empty());

        // Created is redelivered and this time the mapping sticks
        mapping.set_fail_writes(false);
        assert_eq!(harvester.poll().await.unwrap().created, 1);
        assert_eq!(persistent.mapped_count().unwrap(), 1);

        lister.put("a.txt", b"aaaa", 2);
        harvester.poll().await.unwrap();
        assert_eq!(adapter.update_count(), 1);

        lister.remove("a.txt");
        harvester.poll().await.unwrap();
        assert_eq!(adapter.delete_count(), 1);
        assert_eq!(persistent.mapped_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_aborts_without_persisting() {
        let mut lister = MockTreeLister::new();
        lister.expect_check_root().returning(|_| Ok(()));
        lister
            .expect_list()
            .returning(|root| Err(ListerError::Unreachable(root.to_string())));
        lister.expect_locate().times(0);
        let mut store = MockPersistenceStore::new();
        store.expect_load().returning(|_| Ok(None));
        store.expect_store().times(0);

        let harvester = Harvester::new(
            HarvesterConfig::new("docs", ROOT).with_idle_without_listeners(false),
            Arc::new(lister),
            Arc::new(store),
        );
        harvester.start().await.unwrap();

        assert!(matches!(
            harvester.poll().await,
            Err(HarvestError::Lister(ListerError::Unreachable(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_root_does_not_start() {
        let lister = StaticTreeLister::new();
        lister.set_invalid_root(true);
        let store = InMemoryStore::new();
        let harvester = harvester_with(HarvesterConfig::new("docs", ROOT), &lister, &store);

        let result = harvester.start().await;

        assert!(matches!(result, Err(HarvestError::Lister(ListerError::InvalidRoot { .. }))));
        assert_eq!(harvester.status(), HarvesterStatus::Stopped);
        assert!(matches!(harvester.poll().await, Err(HarvestError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_fresh() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        store.store(&persistence_key(ROOT), b"garbage").unwrap();
        let harvester = started(&lister, &store).await;
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();

        harvester.poll().await.unwrap();

        assert_eq!(recording.count(ChangeKind::Created), 1);
    }

    #[tokio::test]
    async fn test_idle_without_listeners_does_not_advance() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;

        let report = harvester.poll().await.unwrap();
        assert!(report.idle);
        assert_eq!(lister.list_calls(), 0);
        assert!(store.is_empty());

        let (recording, shared) = listener("late");
        harvester.register_listener(shared).unwrap();
        harvester.poll().await.unwrap();

        assert_eq!(recording.count(ChangeKind::Created), 1);
    }

    #[tokio::test]
    async fn test_polling_without_listeners_when_not_idle() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let config = HarvesterConfig::new("docs", ROOT).with_idle_without_listeners(false);
        let harvester = harvester_with(config, &lister, &store);
        harvester.start().await.unwrap();

        let report = harvester.poll().await.unwrap();

        assert_eq!(report.created, 1);
        assert!(store.contains(&persistence_key(ROOT)));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_listeners_are_isolated() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let panicking = RecordingListener::with_behavior("panics", ListenerBehavior::Panic);
        let failing = RecordingListener::with_behavior("fails", ListenerBehavior::Fail);
        let (healthy, shared) = listener("healthy");
        harvester.register_listener(Arc::new(panicking.clone())).unwrap();
        harvester.register_listener(Arc::new(failing.clone())).unwrap();
        harvester.register_listener(shared).unwrap();

        let report = harvester.poll().await.unwrap();

        assert_eq!(report.listener_failures, 2);
        assert_eq!(healthy.count(ChangeKind::Created), 1);
        assert_eq!(failing.count(ChangeKind::Created), 1);
        assert_eq!(harvester.poll().await.unwrap().events(), 0);
    }

    #[tokio::test]
    async fn test_single_policy_rejects_second_listener() {
        let lister = StaticTreeLister::new();
        let store = InMemoryStore::new();
        let config = HarvesterConfig::new("docs", ROOT).with_listener_policy(ListenerPolicy::Single);
        let harvester = harvester_with(config, &lister, &store);
        let (_, first) = listener("first");
        let (_, second) = listener("second");

        harvester.register_listener(first.clone()).unwrap();
        harvester.register_listener(first.clone()).unwrap();
        let result = harvester.register_listener(second.clone());

        assert!(matches!(result, Err(HarvestError::ListenerRejected { .. })));
        assert_eq!(harvester.listener_count(), 1);

        assert!(harvester.unregister_listener(&first));
        assert!(!harvester.unregister_listener(&first));
        harvester.register_listener(second).unwrap();
    }

    #[tokio::test]
    async fn test_reconfigure_to_new_root_harvests_from_scratch() {
        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"aaa", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let (recording, shared) = listener("l1");
        harvester.register_listener(shared).unwrap();
        harvester.poll().await.unwrap();

        harvester
            .reconfigure(HarvesterConfig::new("docs", "/data/other"))
            .await
            .unwrap();
        harvester.poll().await.unwrap();

        let locations: Vec<_> = recording.events().into_iter().map(|e| e.location).collect();
        assert_eq!(locations, vec!["/data/docs/a.txt", "/data/other/a.txt"]);
        assert_eq!(harvester.config().await.root, "/data/other");
    }

    #[tokio::test]
    async fn test_reconfigure_rejects_other_id_and_crowded_single_policy() {
        let lister = StaticTreeLister::new();
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        harvester.register_listener(listener("a").1).unwrap();
        harvester.register_listener(listener("b").1).unwrap();

        assert!(matches!(
            harvester.reconfigure(HarvesterConfig::new("other", ROOT)).await,
            Err(HarvestError::Config(_))
        ));
        assert!(matches!(
            harvester
                .reconfigure(HarvesterConfig::new("docs", ROOT).with_listener_policy(ListenerPolicy::Single))
                .await,
            Err(HarvestError::Config(_))
        ));
        assert_eq!(harvester.status(), HarvesterStatus::Polling);
    }

    #[tokio::test]
    async fn test_reconfigure_publishes_poll_interval() {
        let lister = StaticTreeLister::new();
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let mut interval = harvester.subscribe_poll_interval();
        assert_eq!(*interval.borrow_and_update(), crate::config::DEFAULT_POLL_INTERVAL);

        harvester
            .reconfigure(HarvesterConfig::new("docs", ROOT).with_poll_interval(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(interval.has_changed().unwrap());
        assert_eq!(*interval.borrow_and_update(), Duration::from_secs(60));
        assert_eq!(harvester.poll_interval(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_stop_blocks_polling() {
        let lister = StaticTreeLister::new();
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;

        harvester.stop().await;

        assert!(matches!(harvester.poll().await, Err(HarvestError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_listener_reads_content_lazily() {
        struct ContentReader {
            sizes: Mutex<Vec<u64>>,
        }

        #[async_trait::async_trait]
        impl Listener for ContentReader {
            fn name(&self) -> &str {
                "reader"
            }
            async fn on_create(&self, resource: &HarvestedResource) -> Result<(), ListenerError> {
                let content = resource
                    .content()
                    .await
                    .map_err(|e| ListenerError::Failed(e.to_string()))?;
                self.sizes.lock().unwrap().push(content.size());
                Ok(())
            }
            async fn on_update(&self, _: &HarvestedResource) -> Result<(), ListenerError> {
                Ok(())
            }
            async fn on_delete(&self, _: &DeletedResource) -> Result<(), ListenerError> {
                Ok(())
            }
        }

        let lister = StaticTreeLister::new();
        lister.put("a.txt", b"hello", 1);
        let store = InMemoryStore::new();
        let harvester = started(&lister, &store).await;
        let reader = Arc::new(ContentReader {
            sizes: Mutex::new(Vec::new()),
        });
        harvester.register_listener(reader.clone()).unwrap();

        harvester.poll().await.unwrap();

        assert_eq!(*reader.sizes.lock().unwrap(), vec![5]);
    }
}
