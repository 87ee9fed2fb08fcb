//! Orchestrator seam
//!
//! The control plane drives workloads on an external container orchestrator.
//! This crate owns the interface types and the [`Cluster`] trait the builder
//! worker and the operator consume; the orchestrator's wire format stays
//! behind the trait.
//!
//! [`InMemoryCluster`] is the demo-mode backend, used when no orchestrator
//! is reachable and by the test suites.

pub mod memory;

pub use memory::InMemoryCluster;

use std::collections::BTreeMap;

use async_trait::async_trait;
use eventflow_core::domain::function::ResourceRequirements;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors surfaced by a cluster backend.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("workload {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("workload {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },
    #[error("orchestrator error: {0}")]
    Transient(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Controller owner reference, enabling cascading delete of owned workloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: Uuid,
    pub name: String,
}

impl OwnerRef {
    pub fn function(id: Uuid, name: impl Into<String>) -> Self {
        OwnerRef {
            kind: "Function".to_string(),
            id,
            name: name.into(),
        }
    }
}

/// Image pull policy for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

/// Container environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Mount of a named volume into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// A pod-level volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSource {
    /// Scratch space living as long as the workload.
    Ephemeral,
    /// Contents of a named secret.
    Secret { secret_name: String },
}

/// A single container within a workload or build task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: Vec<EnvVar>,
    pub image_pull_policy: PullPolicy,
    pub resources: Option<ResourceRequirements>,
    pub privileged: bool,
    pub volume_mounts: Vec<VolumeMount>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        ContainerSpec {
            name: name.into(),
            image: image.into(),
            command: None,
            args: None,
            env: Vec::new(),
            image_pull_policy: PullPolicy::default(),
            resources: None,
            privileged: false,
            volume_mounts: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_mount(mut self, name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        self.volume_mounts.push(VolumeMount {
            name: name.into(),
            mount_path: mount_path.into(),
        });
        self
    }
}

/// Desired state of a long-running, replicated workload (Deployment-like).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    /// Labels; the selector matches these exactly.
    pub labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub container: ContainerSpec,
    pub owner: Option<OwnerRef>,
}

/// Observed state of a workload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub replicas: i32,
    pub available_replicas: i32,
}

/// A workload as returned by the orchestrator: desired spec plus observed
/// status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub spec: WorkloadSpec,
    pub status: WorkloadStatus,
}

/// Field-scoped patch applied to an existing workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadPatch {
    pub replicas: Option<i32>,
    pub image: Option<String>,
}

impl WorkloadPatch {
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.image.is_none()
    }
}

/// Restart policy for one-shot task pods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure,
}

/// A short-lived, one-shot workload (Job-like), used for builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTaskSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub service_account: String,
    /// No retries inside the orchestrator; the worker owns retry policy.
    pub backoff_limit: u32,
    pub ttl_after_finished_secs: u32,
    pub restart_policy: RestartPolicy,
    pub init_containers: Vec<ContainerSpec>,
    pub containers: Vec<ContainerSpec>,
    pub volumes: Vec<Volume>,
}

/// Terminal-or-not status of a build task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Succeeded { digest: Option<String> },
    Failed { message: String },
}

/// Change notification for workloads; carries the key, not a diff. The
/// reconciler recomputes desired vs. observed from scratch on every event.
#[derive(Debug, Clone)]
pub struct WorkloadEvent {
    pub namespace: String,
    pub name: String,
}

/// Capabilities the control plane needs from the orchestrator.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Creates a workload. Fails with `AlreadyExists` if the name is taken.
    async fn create_workload(&self, spec: WorkloadSpec) -> Result<()>;

    /// Fetches a workload with its observed status.
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload>;

    /// Applies a field-scoped patch to an existing workload.
    async fn patch_workload(
        &self,
        namespace: &str,
        name: &str,
        patch: WorkloadPatch,
    ) -> Result<()>;

    /// Deletes a workload. Deleting a missing workload is not an error.
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()>;

    /// The orchestrator's cascading garbage collection: removes every
    /// workload in the namespace owned by `owner_id`. Returns the number of
    /// workloads collected.
    async fn delete_owned(&self, namespace: &str, owner_id: Uuid) -> Result<u32>;

    /// Dispatches a one-shot build task.
    async fn create_build_task(&self, spec: BuildTaskSpec) -> Result<()>;

    /// Reports the current status of a build task.
    async fn build_task_status(&self, namespace: &str, name: &str) -> Result<TaskStatus>;

    /// Subscribes to workload change notifications.
    fn watch_workloads(&self) -> broadcast::Receiver<WorkloadEvent>;
}
