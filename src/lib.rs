//! HarvestSync - Poll resource trees and sync every change into a downstream catalog
//!
//! This library provides the core functionality for HarvestSync, organized around
//! trait-based dependency injection for testability.

pub mod traits;
pub mod mocks;
pub mod production;

pub mod catalog;
pub mod config;
pub mod harvester;
pub mod observer;
pub mod persistent_listener;
pub mod registry;
pub mod resource;
pub mod scheduler;
pub mod snapshot;
pub mod store;
mod state;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{AppConfig, HarvesterConfig, ListenerConfig, ListenerPolicy};
pub use harvester::{HarvestError, Harvester, HarvesterStatus, PollReport};
pub use observer::{ChangeEvent, ChangeKind, Observer};
pub use persistent_listener::PersistentListener;
pub use registry::HarvesterRegistry;
pub use resource::{correlation_id, persistence_key, DeletedResource, HarvestedResource};
pub use snapshot::{Fingerprint, ListingEntry, TreeSnapshot};
pub use state::AppState;
pub use store::SqliteStore;

/// Initialize logging to stdout and, when `log_dir` is given, a daily log file.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_tracing(log_dir: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = rolling::daily(dir, "harvestsync.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "harvestsync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(file_layer)
        .init();

    Ok(guard)
}
