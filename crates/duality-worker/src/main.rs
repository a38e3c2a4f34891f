//! Duality outbox worker entry point.

use std::error::Error;

use duality_event_store::store;
use duality_worker::config::WorkerConfig;
use duality_worker::worker::OutboxWorker;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Duality outbox worker");

    // Read configuration from environment.
    let config = WorkerConfig::from_env()?;

    // Open the store and bring the schema up to date.
    let pool = store::connect(&config.store).await?;

    // Cancel the drain loop on Ctrl-C.
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for shutdown signal"),
        }
    });

    let worker = OutboxWorker::new(pool.clone(), &config, cancel.clone());
    worker.run(&cancel).await;

    pool.close().await;
    Ok(())
}
