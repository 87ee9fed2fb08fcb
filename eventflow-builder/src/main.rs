//! Eventflow builder worker entry point
//!
//! Connects to the job store, subscribes to build events and runs the worker
//! loop until SIGINT. When Postgres is unreachable the worker falls back to
//! an in-memory store (demo mode); the cluster backend is demo-mode until an
//! orchestrator binding is configured at deployment time.

use std::sync::Arc;

use anyhow::Result;
use eventflow_builder::{BuildWorker, Config};
use eventflow_bus::{InProcessBus, MessageBus};
use eventflow_cluster::{Cluster, InMemoryCluster};
use eventflow_store::{
    BuildJobStore, InMemoryBuildJobStore, PostgresBuildJobStore,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventflow_builder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Eventflow Builder");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Loaded configuration: registry={}, poll_interval={:?}",
        config.registry, config.poll_interval
    );

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());

    let jobs: Arc<dyn BuildJobStore> = match eventflow_store::db::create_pool(&config.database_url)
        .await
    {
        Ok(pool) => {
            eventflow_store::db::run_migrations(&pool).await?;
            info!("Connected to job store");
            Arc::new(PostgresBuildJobStore::with_publisher(pool, Arc::clone(&bus)))
        }
        Err(err) => {
            warn!(
                "Database unavailable ({}); running with in-memory job store (demo mode)",
                err
            );
            Arc::new(InMemoryBuildJobStore::with_publisher(Arc::clone(&bus)))
        }
    };

    warn!("No orchestrator binding configured; using in-memory cluster (demo mode)");
    let cluster: Arc<dyn Cluster> = Arc::new(InMemoryCluster::new());

    // Fan the shutdown signal out to every loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let worker = BuildWorker::new(config, jobs, bus, cluster);
    if let Err(e) = worker.run(shutdown_rx).await {
        error!("Worker error: {:#}", e);
        return Err(e);
    }

    info!("Worker stopped");
    Ok(())
}
