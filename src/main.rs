//! Main entry point for the mintwatch alerting pipeline.

use anyhow::{Context, Result};
use mintwatch::config::WatchConfig;
use mintwatch::pipeline::{spawn_pipeline, PipelineMetrics};
use mintwatch::storage::SqliteAlertStore;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./mintwatch.json".to_string());
    let config = WatchConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    info!("Starting mintwatch (program {})", config.program_id);

    // A missing durable store is fatal at startup
    let store = SqliteAlertStore::connect(&config.db_path).await?;

    let metrics = Arc::new(PipelineMetrics::new());
    let handles = spawn_pipeline(config, store, metrics.clone()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    handles.abort_all();

    let snapshot = metrics.snapshot();
    info!(
        "Final metrics - observed: {}, fresh: {}, notified: {}, dedup rejections: {}, exhausted: {}",
        snapshot.candidates_observed,
        snapshot.candidates_fresh,
        snapshot.notifications_sent,
        snapshot.dedup_rejections,
        snapshot.resolutions_exhausted
    );

    Ok(())
}
