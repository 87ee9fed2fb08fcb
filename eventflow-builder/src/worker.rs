//! Build worker
//!
//! Consumes `build.created` events as the fast path and polls the store for
//! pending jobs as the recovery path. Both paths converge on the store's
//! conditional claim, so redelivered or double-observed jobs are processed
//! at most once.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use eventflow_bus::MessageBus;
use eventflow_cluster::{Cluster, ClusterError};
use eventflow_core::domain::build::{BuildJob, BuildStatus};
use eventflow_core::dto::event::{
    build_status_subject, BuildStatusEvent, BusEvent, EVENTS_SUBJECT, EVENT_BUILD_CREATED,
};
use eventflow_store::{BuildJobStore, StatusUpdate};
use tokio::sync::{watch, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch;
use crate::monitor::{self, BuildError};

/// Event-driven build worker with a fallback poller.
pub struct BuildWorker {
    config: Config,
    jobs: Arc<dyn BuildJobStore>,
    bus: Arc<dyn MessageBus>,
    cluster: Arc<dyn Cluster>,
    semaphore: Arc<Semaphore>,
}

impl BuildWorker {
    pub fn new(
        config: Config,
        jobs: Arc<dyn BuildJobStore>,
        bus: Arc<dyn MessageBus>,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_builds));
        Self {
            config,
            jobs,
            bus,
            cluster,
            semaphore,
        }
    }

    /// Runs the worker until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting build worker (poll interval: {:?}, registry: {})",
            self.config.poll_interval, self.config.registry
        );

        let mut subscription = self
            .bus
            .subscribe(EVENTS_SUBJECT)
            .await
            .context("Failed to subscribe to build events")?;
        let mut subscribed = true;

        let mut ticker = time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                message = subscription.recv(), if subscribed => {
                    match message {
                        Some(payload) => self.handle_event(payload, &shutdown),
                        None => {
                            warn!("Event subscription closed; continuing on poll path only");
                            subscribed = false;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match self.process_pending(&shutdown).await {
                        Ok(picked_up) if picked_up > 0 => {
                            info!("Picked up {} pending job(s) in fallback poll", picked_up);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Error during poll cycle: {:#}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Shutting down; waiting for in-flight builds");
        let permits = self.config.max_parallel_builds as u32;
        if time::timeout(
            std::time::Duration::from_secs(30),
            self.semaphore.acquire_many(permits),
        )
        .await
        .is_err()
        {
            warn!("In-flight builds did not finish within 30s");
        }

        Ok(())
    }

    /// Fast path: a message arrived on `eventflow.events`.
    fn handle_event(&self, payload: Bytes, shutdown: &watch::Receiver<bool>) {
        let event: BusEvent = match serde_json::from_slice(&payload) {
            Ok(event) => event,
            Err(err) => {
                warn!("Failed to decode bus event: {}", err);
                return;
            }
        };

        if event.event_type != EVENT_BUILD_CREATED {
            return;
        }

        let build_id = match event.build_created_payload() {
            Ok(payload) => payload.build_id,
            Err(err) => {
                warn!("Invalid build.created payload: {}", err);
                return;
            }
        };

        debug!(%build_id, "received build event");
        self.spawn_job_task(build_id, shutdown.clone());
    }

    /// Recovery path: pick up pending jobs the bus did not deliver.
    async fn process_pending(&self, shutdown: &watch::Receiver<bool>) -> Result<usize> {
        let jobs = self
            .jobs
            .list_pending(self.config.pending_batch_size)
            .await
            .context("Failed to list pending jobs")?;

        let count = jobs.len();
        for job in jobs {
            self.spawn_job_task(job.id, shutdown.clone());
        }

        Ok(count)
    }

    /// Runs one job on its own task, bounded by the worker's parallelism.
    /// When the worker is saturated the job is skipped; the poller will see
    /// it again.
    fn spawn_job_task(&self, build_id: Uuid, shutdown: watch::Receiver<bool>) {
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(%build_id, "max parallel builds reached, deferring job");
                return;
            }
        };

        let jobs = Arc::clone(&self.jobs);
        let bus = Arc::clone(&self.bus);
        let cluster = Arc::clone(&self.cluster);
        let config = self.config.clone();

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = process_job(jobs, bus, cluster, config, build_id, shutdown).await {
                error!(%build_id, "Failed to process job: {:#}", e);
            }
        });
    }
}

/// Drives a single job from claim to terminal status.
async fn process_job(
    jobs: Arc<dyn BuildJobStore>,
    bus: Arc<dyn MessageBus>,
    cluster: Arc<dyn Cluster>,
    config: Config,
    build_id: Uuid,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let job = jobs.get(build_id).await.context("Failed to fetch job")?;

    // Redelivered events and poll overlap land here; only pending jobs are
    // actionable.
    if job.status != BuildStatus::Pending {
        debug!(%build_id, status = %job.status, "job is not pending, dropping");
        return Ok(());
    }

    let job = match jobs.claim(build_id, "Build started...\n").await {
        Ok(job) => job,
        Err(e) if e.is_conflict() => {
            debug!(%build_id, "job already taken by another worker");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to claim job"),
    };

    info!(
        "Building {}/{} (runtime: {}, job: {})",
        job.namespace, job.function_name, job.runtime, job.id
    );

    let image_ref = match &job.image_ref {
        Some(image_ref) => image_ref.clone(),
        None => {
            let image_ref = job.default_image_ref(&config.registry);
            if let Err(e) = jobs.set_image_ref(job.id, &image_ref).await {
                warn!(%build_id, "Failed to record image ref: {}", e);
            }
            image_ref
        }
    };

    publish_status(
        &*bus,
        job.id,
        BuildStatusEvent::new(
            "started",
            format!("Building {}/{}", job.namespace, job.function_name),
        )
        .with_image_ref(&image_ref),
    )
    .await;

    let task = dispatch::build_task(&job, &image_ref, &config);
    let task_name = task.name.clone();

    if let Err(e) = jobs.append_logs(job.id, "Dispatching build workload...\n").await {
        warn!(%build_id, "Failed to append logs: {}", e);
    }

    match cluster.create_build_task(task).await {
        Ok(()) => {}
        // A crashed predecessor may have left the task behind; monitoring it
        // is the right continuation either way.
        Err(ClusterError::AlreadyExists { .. }) => {
            debug!(%build_id, "build task already exists, monitoring it");
        }
        Err(e) => {
            fail_job(&*jobs, &*bus, &job, &image_ref, &format!("dispatch failed: {}", e)).await;
            return Ok(());
        }
    }

    let outcome = monitor::await_build(
        &*cluster,
        &job.namespace,
        &task_name,
        config.status_poll_interval,
        config.build_timeout,
        &mut shutdown,
    )
    .await;

    match outcome {
        Ok(digest) => {
            if let Err(e) = jobs
                .update_status(
                    job.id,
                    StatusUpdate::new(BuildStatus::Pushing)
                        .with_image(&image_ref)
                        .with_log("Pushing image...\n"),
                )
                .await
            {
                // Retriable per the store contract: the record stays as-is.
                warn!(%build_id, "Failed to record pushing status: {}", e);
                return Ok(());
            }
            publish_status(
                &*bus,
                job.id,
                BuildStatusEvent::new("pushing", "Publishing image to registry")
                    .with_image_ref(&image_ref),
            )
            .await;

            if let Err(e) = jobs
                .update_status(
                    job.id,
                    StatusUpdate::new(BuildStatus::Success)
                        .with_image(&image_ref)
                        .with_log("Build completed successfully\n"),
                )
                .await
            {
                warn!(%build_id, "Failed to record success status: {}", e);
                return Ok(());
            }

            let mut event = BuildStatusEvent::new("succeeded", "Build completed successfully")
                .with_image_ref(&image_ref);
            if let Some(digest) = digest {
                event = event.with_digest(digest);
            }
            publish_status(&*bus, job.id, event).await;

            info!("Job {} completed: {}", job.id, image_ref);
        }
        Err(BuildError::Cancelled) => {
            warn!(%build_id, "build abandoned on shutdown");
        }
        Err(e) => {
            fail_job(&*jobs, &*bus, &job, &image_ref, &e.to_string()).await;
        }
    }

    Ok(())
}

/// Marks a job failed, capturing the cause in both `error` and the log.
async fn fail_job(
    jobs: &dyn BuildJobStore,
    bus: &dyn MessageBus,
    job: &BuildJob,
    image_ref: &str,
    message: &str,
) {
    error!("Job {} failed: {}", job.id, message);

    if let Err(e) = jobs
        .update_status(
            job.id,
            StatusUpdate::new(BuildStatus::Failed)
                .with_error(message)
                .with_log(format!("Build failed: {}\n", message)),
        )
        .await
    {
        warn!(build_id = %job.id, "Failed to record failure: {}", e);
    }

    publish_status(
        bus,
        job.id,
        BuildStatusEvent::new("failed", message).with_image_ref(image_ref),
    )
    .await;
}

/// Observational status event; never affects correctness.
async fn publish_status(bus: &dyn MessageBus, build_id: Uuid, event: BuildStatusEvent) {
    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%build_id, "failed to encode status event: {}", err);
            return;
        }
    };
    if let Err(err) = bus
        .publish(&build_status_subject(build_id), Bytes::from(payload))
        .await
    {
        warn!(%build_id, "failed to publish status event: {}", err);
    }
}
