//! Function reconciler
//!
//! For each trigger key the reconciler fetches the Function, ensures its
//! paired workload exists, patches drifted fields (replicas, image), and
//! writes observed state back to the status subresource. Steps are safe to
//! run arbitrarily often: creates are guarded by a not-found lookup, patches
//! are field-scoped, and status writes never touch the spec.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use eventflow_cluster::{Cluster, ClusterError, WorkloadPatch};
use eventflow_core::domain::function::{Condition, FunctionPhase, FunctionStatus};
use eventflow_store::{FunctionStore, StoreError};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

/// Identifies the Function a trigger refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub namespace: String,
    pub name: String,
}

impl ReconcileKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ReconcileKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the caller should do after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    Requeue,
}

/// Errors aborting a single reconcile; the loop retries with backoff.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

const BACKOFF_INITIAL_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Level-triggered control loop for Function records.
pub struct Reconciler {
    functions: Arc<dyn FunctionStore>,
    cluster: Arc<dyn Cluster>,
}

impl Reconciler {
    pub fn new(functions: Arc<dyn FunctionStore>, cluster: Arc<dyn Cluster>) -> Self {
        Self { functions, cluster }
    }

    /// One full desired-vs-actual pass for a key.
    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<ReconcileOutcome, ReconcileError> {
        // 1. Fetch. A missing (or soft-deleted) Function is not an error:
        //    owner-reference garbage collection handles workload cleanup.
        let function = match self
            .functions
            .get_by_location(&key.namespace, &key.name)
            .await
        {
            Ok(function) => function,
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "function not found, nothing to reconcile");
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(e.into()),
        };

        debug!(key = %key, image = %function.image, "reconciling function");

        // 2. Ensure the workload exists.
        let workload_name = function.workload_name();
        let workload = match self.cluster.get_workload(&key.namespace, &workload_name).await {
            Ok(workload) => workload,
            Err(e) if e.is_not_found() => {
                info!(key = %key, workload = %workload_name, "creating workload");
                let spec = crate::workload::build_workload(&function);
                match self.cluster.create_workload(spec).await {
                    Ok(()) => {}
                    // Lost a create race; the next pass observes the winner.
                    Err(ClusterError::AlreadyExists { .. }) => {
                        debug!(key = %key, "workload created concurrently");
                    }
                    Err(e) => return Err(e.into()),
                }

                let status = FunctionStatus {
                    phase: FunctionPhase::Pending,
                    replicas: 0,
                    available_replicas: 0,
                    last_updated: Some(chrono::Utc::now()),
                    conditions: Vec::new(),
                };
                self.functions
                    .update_status(&key.namespace, &key.name, status)
                    .await?;

                return Ok(ReconcileOutcome::Requeue);
            }
            Err(e) => return Err(e.into()),
        };

        // 3. Diff and patch: replicas and image only.
        let desired_replicas = function.effective_replicas();
        let mut patch = WorkloadPatch::default();
        if workload.spec.replicas != desired_replicas {
            patch.replicas = Some(desired_replicas);
        }
        if workload.spec.container.image != function.image {
            patch.image = Some(function.image.clone());
        }
        if !patch.is_empty() {
            info!(key = %key, workload = %workload_name, "updating workload");
            self.cluster
                .patch_workload(&key.namespace, &workload_name, patch)
                .await?;
        }

        // 4. Compute status from the observed workload.
        let available = workload.status.available_replicas;
        let status = FunctionStatus {
            phase: if available > 0 {
                FunctionPhase::Running
            } else {
                FunctionPhase::Pending
            },
            replicas: workload.status.replicas,
            available_replicas: available,
            last_updated: Some(chrono::Utc::now()),
            conditions: vec![Condition::ready(available, desired_replicas)],
        };

        // 5. Write status only; the spec belongs to the API.
        self.functions
            .update_status(&key.namespace, &key.name, status)
            .await?;

        debug!(
            key = %key,
            "reconciled: {}/{} replicas available",
            available, desired_replicas
        );

        Ok(ReconcileOutcome::Done)
    }

    /// Runs the reconcile loop until shutdown.
    ///
    /// Keys arrive from external triggers, from workload change events, and
    /// from a periodic full resync. A given key is processed sequentially;
    /// failures requeue with exponential backoff.
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<ReconcileKey>,
        resync_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            "Starting function reconciler (resync interval: {:?})",
            resync_interval
        );

        let mut workload_events = self.cluster.watch_workloads();
        let mut resync = time::interval(resync_interval);
        let mut backoff: HashMap<ReconcileKey, u32> = HashMap::new();
        let (requeue_tx, mut requeue_rx) = mpsc::channel::<ReconcileKey>(64);
        let mut triggers_open = true;
        let mut watching = true;

        loop {
            let key = tokio::select! {
                key = triggers.recv(), if triggers_open => {
                    if key.is_none() {
                        triggers_open = false;
                    }
                    key
                }
                key = requeue_rx.recv() => key,
                event = workload_events.recv(), if watching => match event {
                    // Workload names map back to Function names by prefix.
                    Ok(event) => event
                        .name
                        .strip_prefix("fn-")
                        .map(|name| ReconcileKey::new(event.namespace, name)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "workload watch lagged; resync will catch up");
                        None
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        watching = false;
                        None
                    }
                },
                _ = resync.tick() => {
                    self.resync(&mut backoff, &requeue_tx).await;
                    None
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    None
                }
            };

            if let Some(key) = key {
                self.process(key, &mut backoff, &requeue_tx).await;
            }
        }

        info!("Reconciler stopped");
        Ok(())
    }

    /// Level-triggered recovery: reconcile every live Function.
    async fn resync(
        &self,
        backoff: &mut HashMap<ReconcileKey, u32>,
        requeue_tx: &mpsc::Sender<ReconcileKey>,
    ) {
        let functions = match self.functions.list_all().await {
            Ok(functions) => functions,
            Err(e) => {
                warn!("resync listing failed: {}", e);
                return;
            }
        };

        for function in functions {
            let key = ReconcileKey::new(function.namespace, function.name);
            self.process(key, backoff, requeue_tx).await;
        }
    }

    async fn process(
        &self,
        key: ReconcileKey,
        backoff: &mut HashMap<ReconcileKey, u32>,
        requeue_tx: &mpsc::Sender<ReconcileKey>,
    ) {
        match self.reconcile(&key).await {
            Ok(ReconcileOutcome::Done) => {
                backoff.remove(&key);
            }
            Ok(ReconcileOutcome::Requeue) => {
                backoff.remove(&key);
                let _ = requeue_tx.try_send(key);
            }
            Err(e) => {
                let attempts = backoff.entry(key.clone()).or_insert(0);
                *attempts += 1;
                let delay_ms =
                    (BACKOFF_INITIAL_MS << (*attempts - 1).min(16)).min(BACKOFF_MAX_MS);
                warn!(
                    key = %key,
                    attempt = *attempts,
                    "reconcile failed: {:#}; retrying in {} ms",
                    anyhow::Error::from(e),
                    delay_ms
                );

                let requeue_tx = requeue_tx.clone();
                tokio::spawn(async move {
                    time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = requeue_tx.send(key).await;
                });
            }
        }
    }
}
