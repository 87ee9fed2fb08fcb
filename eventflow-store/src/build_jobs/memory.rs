//! In-memory build job repository
//!
//! Demo-mode fallback used when no database is reachable, and the backend
//! the worker test suites run against. Enforces the same claim and
//! transition semantics as the Postgres backend, with a single mutex taking
//! the place of row-level atomicity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventflow_bus::MessageBus;
use eventflow_core::domain::build::{BuildJob, BuildStatus};
use uuid::Uuid;

use super::{publish_build_created, BuildJobStore, NewBuildJob, StatusUpdate};
use crate::error::StoreError;

/// Build job repository held entirely in memory.
pub struct InMemoryBuildJobStore {
    jobs: Mutex<HashMap<Uuid, BuildJob>>,
    publisher: Option<Arc<dyn MessageBus>>,
}

impl InMemoryBuildJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            publisher: None,
        }
    }

    pub fn with_publisher(publisher: Arc<dyn MessageBus>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            publisher: Some(publisher),
        }
    }
}

impl Default for InMemoryBuildJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildJobStore for InMemoryBuildJobStore {
    async fn create(&self, new: NewBuildJob) -> Result<BuildJob, StoreError> {
        let now = chrono::Utc::now();
        let job = BuildJob {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            namespace: new.namespace,
            function_name: new.function_name,
            runtime: new.runtime,
            source: new.source,
            image_ref: new.image_ref,
            status: BuildStatus::Pending,
            image: None,
            error: None,
            logs: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        self.jobs.lock().unwrap().insert(job.id, job.clone());

        if let Some(publisher) = &self.publisher {
            publish_build_created(publisher.as_ref(), &job).await;
        }

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<BuildJob, StoreError> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("build job {}", id)))
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<BuildJob>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<BuildJob> = jobs
            .values()
            .filter(|job| job.status == BuildStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|job| job.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn list_by_function(
        &self,
        tenant_id: &str,
        namespace: &str,
        function_name: &str,
        limit: i64,
    ) -> Result<Vec<BuildJob>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<BuildJob> = jobs
            .values()
            .filter(|job| {
                job.tenant_id == tenant_id
                    && job.namespace == namespace
                    && job.function_name == function_name
            })
            .cloned()
            .collect();
        matching.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn claim(&self, id: Uuid, log_line: &str) -> Result<BuildJob, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("build job {}", id)))?;

        if job.status != BuildStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "build job {} is {}, not pending",
                id, job.status
            )));
        }

        let now = chrono::Utc::now();
        job.status = BuildStatus::Building;
        job.started_at = Some(now);
        job.updated_at = now;
        job.logs.push_str(log_line);

        Ok(job.clone())
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<BuildJob, StoreError> {
        update.validate()?;

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("build job {}", id)))?;

        update.status.validate_transition(job.status)?;

        let now = chrono::Utc::now();
        job.status = update.status;
        if let Some(image) = update.image {
            job.image = Some(image);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(delta) = update.log_delta {
            job.logs.push_str(&delta);
        }
        if update.status == BuildStatus::Building {
            job.started_at = Some(now);
        }
        if update.status.is_terminal() {
            job.completed_at = Some(now);
        }
        job.updated_at = now;

        Ok(job.clone())
    }

    async fn set_image_ref(&self, id: Uuid, image_ref: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("build job {}", id)))?;
        job.image_ref = Some(image_ref.to_string());
        job.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn append_logs(&self, id: Uuid, delta: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("build job {}", id)))?;
        job.logs.push_str(delta);
        job.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_bus::InProcessBus;
    use eventflow_core::domain::build::{Runtime, SourceSpec, TransitionError};
    use eventflow_core::dto::event::{BusEvent, EVENTS_SUBJECT, EVENT_BUILD_CREATED};

    fn new_job(function_name: &str) -> NewBuildJob {
        NewBuildJob {
            tenant_id: "alice".to_string(),
            namespace: "tenant-alice".to_string(),
            function_name: function_name.to_string(),
            runtime: Runtime::Go,
            source: SourceSpec::git("https://example/repo", "main"),
            image_ref: None,
        }
    }

    #[tokio::test]
    async fn create_sets_pending_and_publishes_event() {
        let bus = Arc::new(InProcessBus::new());
        let store = InMemoryBuildJobStore::with_publisher(bus.clone());

        let mut sub = bus.subscribe(EVENTS_SUBJECT).await.unwrap();
        let job = store.create(new_job("hello")).await.unwrap();

        assert_eq!(job.status, BuildStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());

        let raw = sub.recv().await.unwrap();
        let event: BusEvent = serde_json::from_slice(&raw).unwrap();
        assert_eq!(event.event_type, EVENT_BUILD_CREATED);
        assert_eq!(event.build_created_payload().unwrap().build_id, job.id);
    }

    #[tokio::test]
    async fn claim_succeeds_once() {
        let store = InMemoryBuildJobStore::new();
        let job = store.create(new_job("hello")).await.unwrap();

        let claimed = store.claim(job.id, "Build started...\n").await.unwrap();
        assert_eq!(claimed.status, BuildStatus::Building);
        assert!(claimed.started_at.is_some());
        assert!(claimed.logs.contains("Build started"));

        let err = store.claim(job.id, "Build started...\n").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn concurrent_claims_have_a_single_winner() {
        let store = Arc::new(InMemoryBuildJobStore::new());
        let job = store.create(new_job("hello")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let id = job.id;
            handles.push(tokio::spawn(
                async move { store.claim(id, "claimed\n").await },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn full_lifecycle_keeps_logs_monotonic() {
        let store = InMemoryBuildJobStore::new();
        let job = store.create(new_job("hello")).await.unwrap();

        let claimed = store.claim(job.id, "Build started...\n").await.unwrap();

        let pushing = store
            .update_status(
                job.id,
                StatusUpdate::new(BuildStatus::Pushing)
                    .with_image("reg.local/f:1")
                    .with_log("Pushing image...\n"),
            )
            .await
            .unwrap();
        assert!(pushing.logs.starts_with(&claimed.logs));

        let done = store
            .update_status(
                job.id,
                StatusUpdate::new(BuildStatus::Success)
                    .with_image("reg.local/f:1")
                    .with_log("Build completed successfully\n"),
            )
            .await
            .unwrap();

        assert!(done.logs.starts_with(&pushing.logs));
        assert_eq!(done.image.as_deref(), Some("reg.local/f:1"));
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());
    }

    #[tokio::test]
    async fn terminal_states_reject_updates() {
        let store = InMemoryBuildJobStore::new();
        let job = store.create(new_job("hello")).await.unwrap();

        store.claim(job.id, "start\n").await.unwrap();
        store
            .update_status(
                job.id,
                StatusUpdate::new(BuildStatus::Failed).with_error("boom"),
            )
            .await
            .unwrap();

        let err = store
            .update_status(job.id, StatusUpdate::new(BuildStatus::Building))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition(TransitionError::Terminal { .. })
        ));
    }

    #[tokio::test]
    async fn success_straight_from_building_is_forbidden() {
        let store = InMemoryBuildJobStore::new();
        let job = store.create(new_job("hello")).await.unwrap();
        store.claim(job.id, "start\n").await.unwrap();

        let err = store
            .update_status(
                job.id,
                StatusUpdate::new(BuildStatus::Success).with_image("reg.local/f:1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition(TransitionError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn list_pending_is_oldest_first_and_limited() {
        let store = InMemoryBuildJobStore::new();
        let first = store.create(new_job("one")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create(new_job("two")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create(new_job("three")).await.unwrap();

        // Claimed jobs drop out of the pending list
        store.claim(second.id, "start\n").await.unwrap();

        let pending = store.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);

        let limited = store.list_pending(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, first.id);
    }

    #[tokio::test]
    async fn list_by_function_is_newest_first_and_tenant_scoped() {
        let store = InMemoryBuildJobStore::new();
        store.create(new_job("hello")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newest = store.create(new_job("hello")).await.unwrap();

        let mut other_tenant = new_job("hello");
        other_tenant.tenant_id = "bob".to_string();
        store.create(other_tenant).await.unwrap();

        let builds = store
            .list_by_function("alice", "tenant-alice", "hello", 10)
            .await
            .unwrap();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].id, newest.id);
    }

    #[tokio::test]
    async fn append_logs_concatenates() {
        let store = InMemoryBuildJobStore::new();
        let job = store.create(new_job("hello")).await.unwrap();

        store.append_logs(job.id, "line one\n").await.unwrap();
        store.append_logs(job.id, "line two\n").await.unwrap();

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.logs, "line one\nline two\n");
    }

    #[tokio::test]
    async fn set_image_ref_records_target() {
        let store = InMemoryBuildJobStore::new();
        let job = store.create(new_job("hello")).await.unwrap();

        store
            .set_image_ref(job.id, "reg.local/tenant-alice-hello:abc123")
            .await
            .unwrap();

        let job = store.get(job.id).await.unwrap();
        assert_eq!(
            job.image_ref.as_deref(),
            Some("reg.local/tenant-alice-hello:abc123")
        );
    }
}
