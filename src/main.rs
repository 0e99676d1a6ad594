use std::path::PathBuf;

use harvestsync_lib::{init_tracing, AppState};

/// Data directory: first argument, then `HARVESTSYNC_DATA_DIR`, then `./harvestsync-data`
fn data_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("HARVESTSYNC_DATA_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("harvestsync-data"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = data_dir();
    let _guard = init_tracing(Some(&data_dir.join("logs")))?;

    tracing::info!(data_dir = %data_dir.display(), "HarvestSync starting up");

    let state = AppState::open(&data_dir)?;
    let listeners = state.restore_listeners()?;
    let harvesters = state.restore_harvesters().await?;
    if harvesters == 0 {
        tracing::warn!("No harvesters configured; set harvester.<id>.root in config.sqlite");
    }

    tracing::info!(harvesters, listeners, "HarvestSync initialized, sync pipeline active");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    state.shutdown().await;
    Ok(())
}
