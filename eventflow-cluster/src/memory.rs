//! In-memory cluster backend
//!
//! Demo-mode stand-in for a real orchestrator, and the backend the
//! integration suites run against. Workloads and build tasks live in maps
//! behind a mutex; owner-based cascade delete and the workload event stream
//! mirror the orchestrator behaviors the control plane depends on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::{
    BuildTaskSpec, Cluster, ClusterError, Result, TaskStatus, Workload, WorkloadEvent,
    WorkloadPatch, WorkloadSpec, WorkloadStatus,
};

/// Outcome applied to newly created build tasks.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Task completes immediately with the given digest.
    Succeed { digest: Option<String> },
    /// Task fails immediately with the given message.
    Fail { message: String },
    /// Task stays `Active` until completed explicitly.
    Hang,
}

struct BuildTask {
    #[allow(dead_code)]
    spec: BuildTaskSpec,
    status: TaskStatus,
}

/// In-memory [`Cluster`] implementation.
pub struct InMemoryCluster {
    workloads: Mutex<HashMap<(String, String), Workload>>,
    tasks: Mutex<HashMap<(String, String), BuildTask>>,
    events: broadcast::Sender<WorkloadEvent>,
    mutations: AtomicU64,
    task_outcome: Mutex<TaskOutcome>,
    task_status_failures: AtomicU64,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            workloads: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            events,
            mutations: AtomicU64::new(0),
            task_outcome: Mutex::new(TaskOutcome::Succeed { digest: None }),
            task_status_failures: AtomicU64::new(0),
        }
    }

    /// Configures the outcome applied to subsequently created build tasks.
    pub fn with_task_outcome(self, outcome: TaskOutcome) -> Self {
        *self.task_outcome.lock().unwrap() = outcome;
        self
    }

    pub fn set_task_outcome(&self, outcome: TaskOutcome) {
        *self.task_outcome.lock().unwrap() = outcome;
    }

    /// Makes the next `n` status fetches fail with a transient error.
    pub fn fail_task_status_times(&self, n: u64) {
        self.task_status_failures.store(n, Ordering::SeqCst);
    }

    /// Total number of mutating calls (creates, patches, deletes) observed.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Marks replicas of a workload available, as a rollout would, and
    /// notifies watchers.
    pub fn set_available_replicas(&self, namespace: &str, name: &str, available: i32) {
        let mut workloads = self.workloads.lock().unwrap();
        if let Some(workload) = workloads.get_mut(&key(namespace, name)) {
            workload.status = WorkloadStatus {
                replicas: workload.spec.replicas,
                available_replicas: available,
            };
        }
        drop(workloads);
        self.notify(namespace, name);
    }

    /// Completes a hung build task with an explicit status.
    pub fn complete_build_task(&self, namespace: &str, name: &str, status: TaskStatus) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&key(namespace, name)) {
            task.status = status;
        }
    }

    /// Returns the spec of a dispatched build task, if present.
    pub fn build_task_spec(&self, namespace: &str, name: &str) -> Option<BuildTaskSpec> {
        let tasks = self.tasks.lock().unwrap();
        tasks.get(&key(namespace, name)).map(|t| t.spec.clone())
    }

    /// Lists build task names in a namespace.
    pub fn build_task_names(&self, namespace: &str) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn notify(&self, namespace: &str, name: &str) {
        // Send errors only mean nobody is watching.
        let _ = self.events.send(WorkloadEvent {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl Cluster for InMemoryCluster {
    async fn create_workload(&self, spec: WorkloadSpec) -> Result<()> {
        let namespace = spec.namespace.clone();
        let name = spec.name.clone();

        let mut workloads = self.workloads.lock().unwrap();
        if workloads.contains_key(&key(&namespace, &name)) {
            return Err(ClusterError::AlreadyExists { namespace, name });
        }
        workloads.insert(
            key(&namespace, &name),
            Workload {
                spec,
                status: WorkloadStatus::default(),
            },
        );
        drop(workloads);

        debug!(%namespace, %name, "workload created");
        self.record_mutation();
        self.notify(&namespace, &name);
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        let workloads = self.workloads.lock().unwrap();
        workloads
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn patch_workload(
        &self,
        namespace: &str,
        name: &str,
        patch: WorkloadPatch,
    ) -> Result<()> {
        let mut workloads = self.workloads.lock().unwrap();
        let workload =
            workloads
                .get_mut(&key(namespace, name))
                .ok_or_else(|| ClusterError::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;

        if let Some(replicas) = patch.replicas {
            workload.spec.replicas = replicas;
        }
        if let Some(image) = patch.image {
            workload.spec.container.image = image;
        }
        drop(workloads);

        debug!(%namespace, %name, "workload patched");
        self.record_mutation();
        self.notify(namespace, name);
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()> {
        let mut workloads = self.workloads.lock().unwrap();
        let removed = workloads.remove(&key(namespace, name)).is_some();
        drop(workloads);

        if removed {
            self.record_mutation();
            self.notify(namespace, name);
        }
        Ok(())
    }

    async fn delete_owned(&self, namespace: &str, owner_id: Uuid) -> Result<u32> {
        let mut workloads = self.workloads.lock().unwrap();
        let owned: Vec<(String, String)> = workloads
            .iter()
            .filter(|((ns, _), workload)| {
                ns == namespace
                    && workload
                        .spec
                        .owner
                        .as_ref()
                        .is_some_and(|owner| owner.id == owner_id)
            })
            .map(|(k, _)| k.clone())
            .collect();

        for k in &owned {
            workloads.remove(k);
        }
        drop(workloads);

        for (ns, name) in &owned {
            self.record_mutation();
            self.notify(ns, name);
        }
        Ok(owned.len() as u32)
    }

    async fn create_build_task(&self, spec: BuildTaskSpec) -> Result<()> {
        let namespace = spec.namespace.clone();
        let name = spec.name.clone();

        let status = match self.task_outcome.lock().unwrap().clone() {
            TaskOutcome::Succeed { digest } => TaskStatus::Succeeded { digest },
            TaskOutcome::Fail { message } => TaskStatus::Failed { message },
            TaskOutcome::Hang => TaskStatus::Active,
        };

        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(&key(&namespace, &name)) {
            return Err(ClusterError::AlreadyExists { namespace, name });
        }
        tasks.insert(key(&namespace, &name), BuildTask { spec, status });
        drop(tasks);

        debug!(%namespace, %name, "build task dispatched");
        self.record_mutation();
        Ok(())
    }

    async fn build_task_status(&self, namespace: &str, name: &str) -> Result<TaskStatus> {
        if self.task_status_failures.load(Ordering::SeqCst) > 0 {
            self.task_status_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ClusterError::Transient(
                "status endpoint unavailable".to_string(),
            ));
        }

        let tasks = self.tasks.lock().unwrap();
        tasks
            .get(&key(namespace, name))
            .map(|task| task.status.clone())
            .ok_or_else(|| ClusterError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn watch_workloads(&self) -> broadcast::Receiver<WorkloadEvent> {
        self.events.subscribe()
    }
}
