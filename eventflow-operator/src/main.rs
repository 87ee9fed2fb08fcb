//! Eventflow operator entry point
//!
//! Connects to the function store and runs the reconcile loop until SIGINT.
//! When Postgres is unreachable the operator falls back to an in-memory
//! store (demo mode); the cluster backend is demo-mode until an orchestrator
//! binding is configured at deployment time.

use std::sync::Arc;

use anyhow::Result;
use eventflow_cluster::{Cluster, InMemoryCluster};
use eventflow_operator::{Config, ReconcileKey, Reconciler};
use eventflow_store::{FunctionStore, InMemoryFunctionStore, PostgresFunctionStore};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventflow_operator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Eventflow Operator");

    let config = Config::from_env();
    config.validate()?;

    let functions: Arc<dyn FunctionStore> =
        match eventflow_store::db::create_pool(&config.database_url).await {
            Ok(pool) => {
                eventflow_store::db::run_migrations(&pool).await?;
                info!("Connected to function store");
                Arc::new(PostgresFunctionStore::new(pool))
            }
            Err(err) => {
                warn!(
                    "Database unavailable ({}); running with in-memory function store (demo mode)",
                    err
                );
                Arc::new(InMemoryFunctionStore::new())
            }
        };

    warn!("No orchestrator binding configured; using in-memory cluster (demo mode)");
    let cluster: Arc<dyn Cluster> = Arc::new(InMemoryCluster::new());

    // External trigger channel; the API collaborator holds the sender.
    let (_trigger_tx, trigger_rx) = mpsc::channel::<ReconcileKey>(64);

    // Fan the shutdown signal out to every loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let reconciler = Reconciler::new(functions, cluster);
    if let Err(e) = reconciler
        .run(trigger_rx, config.resync_interval, shutdown_rx)
        .await
    {
        error!("Reconciler error: {:#}", e);
        return Err(e);
    }

    info!("Operator stopped");
    Ok(())
}
