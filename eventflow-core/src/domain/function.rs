//! Function domain types
//!
//! Desired state for a deployable workload, plus the observed status the
//! reconciler writes back. Records are identified by
//! `(tenant_id, namespace, name)` and soft-deleted rather than removed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Replica bounds enforced at creation time, before a record can reach the
/// reconciler.
pub const MIN_REPLICAS: i32 = 1;
pub const MAX_REPLICAS: i32 = 10;

/// Desired state of a deployable function workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// Stable identity used for orchestrator owner references.
    pub id: Uuid,
    pub tenant_id: String,
    pub namespace: String,
    pub name: String,
    /// Container image to run.
    pub image: String,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: HashMap<String, String>,
    /// Desired replica count in [1, 10]; `None` means 1.
    pub replicas: Option<i32>,
    pub resources: Option<ResourceRequirements>,
    pub status: FunctionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Soft-delete marker; non-null hides the record from all non-admin reads.
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl FunctionRecord {
    /// Desired replicas with the spec default applied.
    pub fn effective_replicas(&self) -> i32 {
        self.replicas.unwrap_or(MIN_REPLICAS)
    }

    /// Name of the paired orchestrator workload.
    pub fn workload_name(&self) -> String {
        format!("fn-{}", self.name)
    }
}

/// CPU/memory requests and limits, as orchestrator quantity strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

/// Observed state, written exclusively by the reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionStatus {
    pub phase: FunctionPhase,
    pub replicas: i32,
    pub available_replicas: i32,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    pub conditions: Vec<Condition>,
}

/// Lifecycle phase of a function workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionPhase {
    #[default]
    Pending,
    Running,
    Failed,
    Unknown,
}

impl std::fmt::Display for FunctionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FunctionPhase::Pending => "Pending",
            FunctionPhase::Running => "Running",
            FunctionPhase::Failed => "Failed",
            FunctionPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A typed status condition, mirroring the orchestrator's condition shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: chrono::DateTime<chrono::Utc>,
}

impl Condition {
    /// The `Ready` condition: true iff any replica is available.
    pub fn ready(available: i32, desired: i32) -> Self {
        Condition {
            condition_type: "Ready".to_string(),
            status: available > 0,
            reason: if available > 0 {
                "WorkloadReady".to_string()
            } else {
                "WorkloadUnavailable".to_string()
            },
            message: format!("{}/{} replicas available", available, desired),
            last_transition_time: chrono::Utc::now(),
        }
    }
}
