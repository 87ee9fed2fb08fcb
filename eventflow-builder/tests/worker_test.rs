//! End-to-end worker tests against the in-memory backends
//!
//! These exercise both delivery paths (bus event and fallback poll), the
//! claim-based idempotence guarantees, and failure propagation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eventflow_builder::{BuildWorker, Config};
use eventflow_bus::{InProcessBus, MessageBus};
use eventflow_cluster::memory::{InMemoryCluster, TaskOutcome};
use eventflow_core::domain::build::{BuildJob, BuildStatus, Runtime, SourceSpec};
use eventflow_core::dto::event::{BusEvent, EVENTS_SUBJECT};
use eventflow_store::{BuildJobStore, InMemoryBuildJobStore, NewBuildJob};
use tokio::sync::watch;

struct Harness {
    bus: Arc<InProcessBus>,
    jobs: Arc<InMemoryBuildJobStore>,
    cluster: Arc<InMemoryCluster>,
    shutdown: watch::Sender<bool>,
}

fn test_config() -> Config {
    let mut config = Config::new(
        "postgres://unused".to_string(),
        "reg.local".to_string(),
    );
    config.poll_interval = Duration::from_millis(100);
    config.status_poll_interval = Duration::from_millis(20);
    config.build_timeout = Duration::from_secs(5);
    config
}

/// Starts a worker over fresh in-memory backends and returns handles to them.
fn start_worker(config: Config, outcome: TaskOutcome, publish_on_create: bool) -> Harness {
    let bus = Arc::new(InProcessBus::new());
    let jobs = if publish_on_create {
        Arc::new(InMemoryBuildJobStore::with_publisher(
            bus.clone() as Arc<dyn MessageBus>
        ))
    } else {
        Arc::new(InMemoryBuildJobStore::new())
    };
    let cluster = Arc::new(InMemoryCluster::new().with_task_outcome(outcome));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = BuildWorker::new(
        config,
        jobs.clone(),
        bus.clone(),
        cluster.clone(),
    );
    tokio::spawn(async move {
        let _ = worker.run(shutdown_rx).await;
    });

    Harness {
        bus,
        jobs,
        cluster,
        shutdown: shutdown_tx,
    }
}

fn new_job(source: SourceSpec) -> NewBuildJob {
    NewBuildJob {
        tenant_id: "alice".to_string(),
        namespace: "tenant-alice".to_string(),
        function_name: "hello".to_string(),
        runtime: Runtime::Go,
        source,
        image_ref: None,
    }
}

/// Polls the store until the job reaches `status` or the deadline passes.
async fn wait_for_status(
    jobs: &InMemoryBuildJobStore,
    id: uuid::Uuid,
    status: BuildStatus,
) -> BuildJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = jobs.get(id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {:?}, expected {:?}; logs:\n{}",
            id,
            job.status,
            status,
            job.logs
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn happy_path_git_build() {
    let harness = start_worker(
        test_config(),
        TaskOutcome::Succeed {
            digest: Some("sha256:abc123".to_string()),
        },
        true,
    );

    let job = harness
        .jobs
        .create(new_job(SourceSpec::git("https://example/repo", "main")))
        .await
        .unwrap();

    let done = wait_for_status(&harness.jobs, job.id, BuildStatus::Success).await;

    let expected_image = job.default_image_ref("reg.local");
    assert_eq!(done.image.as_deref(), Some(expected_image.as_str()));
    assert_eq!(done.image_ref.as_deref(), Some(expected_image.as_str()));
    assert!(done.error.is_none());
    assert!(done.started_at.unwrap() < done.completed_at.unwrap());
    assert!(done.logs.contains("Build started"));
    assert!(done.logs.contains("Pushing image"));
    assert!(done.logs.contains("Build completed successfully"));

    // The build ran as a dispatched workload
    let task = harness
        .cluster
        .build_task_spec("tenant-alice", &format!("build-{}", job.id))
        .expect("build task dispatched");
    assert_eq!(task.labels.get("app").unwrap(), "builder");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn lost_event_is_recovered_by_the_poller() {
    // Store without a publisher: the insert happens, the event never fires.
    let harness = start_worker(test_config(), TaskOutcome::Succeed { digest: None }, false);

    let job = harness
        .jobs
        .create(new_job(SourceSpec::git("https://example/repo", "main")))
        .await
        .unwrap();

    let done = wait_for_status(&harness.jobs, job.id, BuildStatus::Success).await;
    assert!(done.image.is_some());

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn double_delivery_claims_exactly_once() {
    let harness = start_worker(test_config(), TaskOutcome::Succeed { digest: None }, true);

    let job = harness
        .jobs
        .create(new_job(SourceSpec::git("https://example/repo", "main")))
        .await
        .unwrap();

    // Redeliver the same event by hand
    let duplicate = serde_json::to_vec(&BusEvent::build_created(&job)).unwrap();
    harness
        .bus
        .publish(EVENTS_SUBJECT, Bytes::from(duplicate))
        .await
        .unwrap();

    let done = wait_for_status(&harness.jobs, job.id, BuildStatus::Success).await;

    // Exactly one worker won the pending -> building transition
    assert_eq!(done.logs.matches("Build started").count(), 1);
    assert_eq!(done.logs.matches("Build completed successfully").count(), 1);

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn build_failure_is_propagated() {
    let harness = start_worker(
        test_config(),
        TaskOutcome::Fail {
            message: "pack: ERROR: failed to detect buildable source".to_string(),
        },
        true,
    );

    let job = harness
        .jobs
        .create(new_job(SourceSpec::inline("")))
        .await
        .unwrap();

    let done = wait_for_status(&harness.jobs, job.id, BuildStatus::Failed).await;

    assert!(done
        .error
        .as_deref()
        .unwrap()
        .contains("failed to detect buildable source"));
    assert!(done.image.is_none());
    assert!(done.logs.contains("pack: ERROR"));
    assert!(done.completed_at.is_some());

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn hung_build_times_out_deterministically() {
    let mut config = test_config();
    config.build_timeout = Duration::from_millis(200);

    let harness = start_worker(config, TaskOutcome::Hang, true);

    let job = harness
        .jobs
        .create(new_job(SourceSpec::git("https://example/repo", "main")))
        .await
        .unwrap();

    let done = wait_for_status(&harness.jobs, job.id, BuildStatus::Failed).await;
    assert!(done.error.as_deref().unwrap().contains("timed out"));

    let _ = harness.shutdown.send(true);
}
