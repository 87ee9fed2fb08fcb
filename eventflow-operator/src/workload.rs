//! Workload construction
//!
//! Builds the orchestrator workload spec for a Function record. Additional
//! fields (env, command, args, resources) are applied at create time only;
//! the reconcile diff covers replicas and image.

use std::collections::BTreeMap;

use eventflow_cluster::{ContainerSpec, OwnerRef, PullPolicy, WorkloadSpec};
use eventflow_core::domain::function::{FunctionRecord, ResourceRequirements};

const DEFAULT_CPU_REQUEST: &str = "100m";
const DEFAULT_MEMORY_REQUEST: &str = "128Mi";
const DEFAULT_CPU_LIMIT: &str = "500m";
const DEFAULT_MEMORY_LIMIT: &str = "512Mi";

/// Builds the workload spec for a Function.
pub fn build_workload(function: &FunctionRecord) -> WorkloadSpec {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "eventflow-function".to_string());
    labels.insert("function".to_string(), function.name.clone());

    let mut container = ContainerSpec::new("function", function.image.clone());
    container.image_pull_policy = PullPolicy::IfNotPresent;
    container.command = function.command.clone();
    container.args = function.args.clone();
    container.resources = Some(resources(function));

    // Sorted for a stable spec; the orchestrator treats env as a list.
    let mut env: Vec<(&String, &String)> = function.env.iter().collect();
    env.sort();
    for (name, value) in env {
        container = container.with_env(name.clone(), value.clone());
    }

    WorkloadSpec {
        name: function.workload_name(),
        namespace: function.namespace.clone(),
        labels,
        replicas: function.effective_replicas(),
        container,
        owner: Some(OwnerRef::function(function.id, function.name.clone())),
    }
}

/// Resource requests/limits with defaults, required by tenant quotas.
fn resources(function: &FunctionRecord) -> ResourceRequirements {
    let overrides = function.resources.clone().unwrap_or(ResourceRequirements {
        cpu_request: None,
        memory_request: None,
        cpu_limit: None,
        memory_limit: None,
    });

    ResourceRequirements {
        cpu_request: overrides
            .cpu_request
            .or_else(|| Some(DEFAULT_CPU_REQUEST.to_string())),
        memory_request: overrides
            .memory_request
            .or_else(|| Some(DEFAULT_MEMORY_REQUEST.to_string())),
        cpu_limit: overrides
            .cpu_limit
            .or_else(|| Some(DEFAULT_CPU_LIMIT.to_string())),
        memory_limit: overrides
            .memory_limit
            .or_else(|| Some(DEFAULT_MEMORY_LIMIT.to_string())),
    }
}
