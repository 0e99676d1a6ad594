//! Application state management

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::catalog::CatalogAdapter;
use crate::config::{AppConfig, HarvesterConfig, ListenerConfig};
use crate::harvester::{Harvester, SNAPSHOT_NAMESPACE};
use crate::persistent_listener::PersistentListener;
use crate::production::{DirectoryLister, JsonDirCatalog, MetadataTransformer};
use crate::registry::HarvesterRegistry;
use crate::scheduler::{spawn_poller, PollerHandle};
use crate::store::SqliteStore;
use crate::traits::TreeLister;

/// Application state containing all dependencies
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<HarvesterRegistry>,
    data_dir: PathBuf,
    state_path: PathBuf,
    lister: Arc<dyn TreeLister>,
    pollers: Mutex<Vec<PollerHandle>>,
}

impl AppState {
    /// Open the config and state databases under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::info!("Initializing AppState");
        std::fs::create_dir_all(data_dir)?;

        let config_path = data_dir.join("config.sqlite");
        tracing::info!(path = %config_path.display(), "Opening config database");
        let config_conn = rusqlite::Connection::open(&config_path)?;
        AppConfig::init_table(&config_conn)?;
        let config = Arc::new(AppConfig::from_connection(config_conn));

        let state_path = data_dir.join("state.sqlite");
        tracing::info!(path = %state_path.display(), "Using harvest state database");

        Ok(Self {
            config,
            registry: Arc::new(HarvesterRegistry::new()),
            data_dir: data_dir.to_path_buf(),
            state_path,
            lister: Arc::new(DirectoryLister::new()),
            pollers: Mutex::new(Vec::new()),
        })
    }

    /// Build every configured persistent listener and hand it to the registry.
    /// Misconfigured listeners are skipped.
    pub fn restore_listeners(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let mut restored = 0;
        for name in self.config.listener_names()? {
            let listener_config = match ListenerConfig::from_app_config(&self.config, &name) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(listener = %name, error = %e, "Skipping misconfigured listener");
                    continue;
                }
            };

            let catalog_dir = listener_config
                .catalog_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("catalog").join(&name));
            let catalog = JsonDirCatalog::open(&catalog_dir)?;
            let adapter = CatalogAdapter::new(Arc::new(MetadataTransformer::new()), Arc::new(catalog));
            let store = SqliteStore::open(&self.state_path, &PersistentListener::namespace_for(&name))?;
            let listener = PersistentListener::new(&name, Arc::new(adapter), Arc::new(store));

            self.registry.add_listener(&listener_config.watch, Arc::new(listener));
            tracing::info!(
                listener = %name,
                watch = %listener_config.watch,
                catalog_dir = %catalog_dir.display(),
                "Restored persistent listener"
            );
            restored += 1;
        }
        Ok(restored)
    }

    /// Start every configured harvester, register it and spawn its poller.
    /// Harvesters that fail to start are skipped.
    pub async fn restore_harvesters(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let snapshots = Arc::new(SqliteStore::open(&self.state_path, SNAPSHOT_NAMESPACE)?);
        let mut restored = 0;

        for id in self.config.harvester_ids()? {
            let harvester_config = match HarvesterConfig::from_app_config(&self.config, &id) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(harvester_id = %id, error = %e, "Skipping misconfigured harvester");
                    continue;
                }
            };

            let harvester = Arc::new(Harvester::new(
                harvester_config,
                self.lister.clone(),
                snapshots.clone(),
            ));
            if harvester.start().await.is_err() {
                continue;
            }
            self.registry.add_harvester(harvester.clone())?;

            self.pollers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(spawn_poller(harvester));
            restored += 1;
        }
        Ok(restored)
    }

    /// Stop every poller (waiting for in-flight polls), then every harvester
    pub async fn shutdown(&self) {
        let pollers = std::mem::take(&mut *self.pollers.lock().unwrap_or_else(PoisonError::into_inner));
        for poller in pollers {
            poller.shutdown().await;
        }
        for harvester in self.registry.harvesters() {
            harvester.stop().await;
        }
        tracing::info!("All harvesters stopped");
    }
}
