//! Reconciler tests against the in-memory backends
//!
//! Cover the create/converge/scale paths, reconcile idempotence, and the
//! deletion cascade via owner references.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eventflow_cluster::{Cluster, InMemoryCluster};
use eventflow_core::domain::function::FunctionPhase;
use eventflow_operator::{ReconcileKey, ReconcileOutcome, Reconciler};
use eventflow_store::{FunctionStore, InMemoryFunctionStore, NewFunction};
use tokio::sync::{mpsc, watch};

struct Harness {
    functions: Arc<InMemoryFunctionStore>,
    cluster: Arc<InMemoryCluster>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let functions = Arc::new(InMemoryFunctionStore::new());
    let cluster = Arc::new(InMemoryCluster::new());
    let reconciler = Reconciler::new(functions.clone(), cluster.clone());
    Harness {
        functions,
        cluster,
        reconciler,
    }
}

fn new_function(name: &str, replicas: Option<i32>) -> NewFunction {
    NewFunction {
        tenant_id: "alice".to_string(),
        namespace: "tenant-alice".to_string(),
        name: name.to_string(),
        image: "reg.local/hello:1".to_string(),
        command: None,
        args: None,
        env: HashMap::new(),
        replicas,
        resources: None,
    }
}

fn key(name: &str) -> ReconcileKey {
    ReconcileKey::new("tenant-alice", name)
}

#[tokio::test]
async fn first_reconcile_creates_owned_workload() {
    let h = harness();
    let record = h.functions.create(new_function("hello", None)).await.unwrap();

    let outcome = h.reconciler.reconcile(&key("hello")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue);

    let workload = h
        .cluster
        .get_workload("tenant-alice", "fn-hello")
        .await
        .unwrap();
    // Nil replicas default to 1
    assert_eq!(workload.spec.replicas, 1);
    assert_eq!(workload.spec.container.image, "reg.local/hello:1");
    assert_eq!(workload.spec.owner.as_ref().unwrap().id, record.id);

    let function = h.functions.get_by_location("tenant-alice", "hello").await.unwrap();
    assert_eq!(function.status.phase, FunctionPhase::Pending);
}

#[tokio::test]
async fn availability_flips_phase_to_running() {
    let h = harness();
    h.functions.create(new_function("hello", None)).await.unwrap();

    assert_eq!(
        h.reconciler.reconcile(&key("hello")).await.unwrap(),
        ReconcileOutcome::Requeue
    );

    h.cluster.set_available_replicas("tenant-alice", "fn-hello", 1);
    assert_eq!(
        h.reconciler.reconcile(&key("hello")).await.unwrap(),
        ReconcileOutcome::Done
    );

    let function = h.functions.get_by_location("tenant-alice", "hello").await.unwrap();
    assert_eq!(function.status.phase, FunctionPhase::Running);
    assert_eq!(function.status.available_replicas, 1);
    assert_eq!(function.status.replicas, 1);

    let ready = &function.status.conditions[0];
    assert_eq!(ready.condition_type, "Ready");
    assert!(ready.status);
    assert_eq!(ready.message, "1/1 replicas available");
}

#[tokio::test]
async fn back_to_back_reconcile_makes_no_mutations() {
    let h = harness();
    h.functions.create(new_function("hello", None)).await.unwrap();

    h.reconciler.reconcile(&key("hello")).await.unwrap();
    h.cluster.set_available_replicas("tenant-alice", "fn-hello", 1);
    h.reconciler.reconcile(&key("hello")).await.unwrap();

    let mutations_before = h.cluster.mutation_count();
    let outcome = h.reconciler.reconcile(&key("hello")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.cluster.mutation_count(), mutations_before);
}

#[tokio::test]
async fn replica_scale_up_converges() {
    let h = harness();
    h.functions.create(new_function("hello", Some(1))).await.unwrap();

    h.reconciler.reconcile(&key("hello")).await.unwrap();
    h.cluster.set_available_replicas("tenant-alice", "fn-hello", 1);
    h.reconciler.reconcile(&key("hello")).await.unwrap();

    // The API scales the function up
    h.functions
        .update_replicas("alice", "tenant-alice", "hello", 3)
        .await
        .unwrap();

    // One reconcile patches the workload
    h.reconciler.reconcile(&key("hello")).await.unwrap();
    let workload = h
        .cluster
        .get_workload("tenant-alice", "fn-hello")
        .await
        .unwrap();
    assert_eq!(workload.spec.replicas, 3);

    // After the rollout, one more reconcile reports the new capacity
    h.cluster.set_available_replicas("tenant-alice", "fn-hello", 3);
    h.reconciler.reconcile(&key("hello")).await.unwrap();

    let function = h.functions.get_by_location("tenant-alice", "hello").await.unwrap();
    assert_eq!(function.status.available_replicas, 3);
    assert_eq!(function.status.phase, FunctionPhase::Running);
    assert_eq!(function.status.conditions[0].message, "3/3 replicas available");
}

#[tokio::test]
async fn image_drift_is_patched() {
    let h = harness();
    h.functions.create(new_function("hello", None)).await.unwrap();
    h.reconciler.reconcile(&key("hello")).await.unwrap();

    h.functions
        .update_image("alice", "tenant-alice", "hello", "reg.local/hello:2")
        .await
        .unwrap();
    h.reconciler.reconcile(&key("hello")).await.unwrap();

    let workload = h
        .cluster
        .get_workload("tenant-alice", "fn-hello")
        .await
        .unwrap();
    assert_eq!(workload.spec.container.image, "reg.local/hello:2");
}

#[tokio::test]
async fn deletion_cascade_is_not_recreated() {
    let h = harness();
    h.functions.create(new_function("hello", None)).await.unwrap();
    h.reconciler.reconcile(&key("hello")).await.unwrap();
    assert!(h.cluster.get_workload("tenant-alice", "fn-hello").await.is_ok());

    // The API soft-deletes; the orchestrator's GC collects owned workloads
    let deleted = h
        .functions
        .soft_delete("alice", "tenant-alice", "hello")
        .await
        .unwrap();
    let collected = h
        .cluster
        .delete_owned("tenant-alice", deleted.id)
        .await
        .unwrap();
    assert_eq!(collected, 1);

    // The reconciler observes the deletion and must not recreate
    let outcome = h.reconciler.reconcile(&key("hello")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(h
        .cluster
        .get_workload("tenant-alice", "fn-hello")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn run_loop_converges_from_triggers_and_watch_events() {
    let h = harness();
    let functions = h.functions.clone();
    let cluster = h.cluster.clone();

    let (trigger_tx, trigger_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = Reconciler::new(functions.clone(), cluster.clone());
    let loop_handle = tokio::spawn(async move {
        reconciler
            .run(trigger_rx, Duration::from_secs(60), shutdown_rx)
            .await
    });

    functions.create(new_function("hello", None)).await.unwrap();
    trigger_tx.send(key("hello")).await.unwrap();

    // The trigger creates the workload; the requeue finishes the first pass
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if cluster.get_workload("tenant-alice", "fn-hello").await.is_ok() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "workload never created");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // A rollout fires a workload event, which re-reconciles and updates status
    cluster.set_available_replicas("tenant-alice", "fn-hello", 1);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let function = functions.get_by_location("tenant-alice", "hello").await.unwrap();
        if function.status.phase == FunctionPhase::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "status never converged");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let _ = shutdown_tx.send(true);
    loop_handle.await.unwrap().unwrap();
}
