//! Build job repository
//!
//! The [`BuildJobStore`] trait is the durable queue the builder worker fleet
//! runs against. The `pending -> building` claim is the cross-worker
//! coordination primitive: a conditional update that at most one caller
//! wins. Everything else is a status transition validated against the graph
//! in `eventflow-core`.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBuildJobStore;
pub use postgres::PostgresBuildJobStore;

use async_trait::async_trait;
use bytes::Bytes;
use eventflow_bus::MessageBus;
use eventflow_core::domain::build::{BuildJob, BuildStatus, Runtime, SourceSpec};
use eventflow_core::dto::event::{BusEvent, EVENTS_SUBJECT};
use uuid::Uuid;

use crate::error::StoreError;

/// Best-effort `build.created` notification. Failures are logged and
/// swallowed; the worker's fallback poller is the recovery path.
pub(crate) async fn publish_build_created(bus: &dyn MessageBus, job: &BuildJob) {
    let event = BusEvent::build_created(job);
    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(build_id = %job.id, "failed to encode build event: {}", err);
            return;
        }
    };
    if let Err(err) = bus.publish(EVENTS_SUBJECT, Bytes::from(payload)).await {
        tracing::warn!(build_id = %job.id, "failed to publish build event: {}", err);
    }
}

/// Request to enqueue a build.
#[derive(Debug, Clone)]
pub struct NewBuildJob {
    pub tenant_id: String,
    pub namespace: String,
    pub function_name: String,
    pub runtime: Runtime,
    pub source: SourceSpec,
    /// Target image; the worker assigns a default before dispatch when unset.
    pub image_ref: Option<String>,
}

/// A status transition request.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: BuildStatus,
    pub image: Option<String>,
    pub error: Option<String>,
    pub log_delta: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: BuildStatus) -> Self {
        StatusUpdate {
            status,
            image: None,
            error: None,
            log_delta: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_log(mut self, log_delta: impl Into<String>) -> Self {
        self.log_delta = Some(log_delta.into());
        self
    }

    /// Field-level invariants, shared by every backend: success carries an
    /// image, failure carries an error.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self.status {
            BuildStatus::Success if self.image.is_none() => Err(StoreError::InvalidArgument(
                "success status requires an image".to_string(),
            )),
            BuildStatus::Failed if self.error.is_none() => Err(StoreError::InvalidArgument(
                "failed status requires an error".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Durable build job repository.
#[async_trait]
pub trait BuildJobStore: Send + Sync {
    /// Persists a new pending job, then publishes `build.created`.
    /// Publication failure never rolls back the insert.
    async fn create(&self, new: NewBuildJob) -> Result<BuildJob, StoreError>;

    async fn get(&self, id: Uuid) -> Result<BuildJob, StoreError>;

    /// Pending jobs, oldest first. The worker's recovery path.
    async fn list_pending(&self, limit: i64) -> Result<Vec<BuildJob>, StoreError>;

    /// Build history for a function, newest first.
    async fn list_by_function(
        &self,
        tenant_id: &str,
        namespace: &str,
        function_name: &str,
        limit: i64,
    ) -> Result<Vec<BuildJob>, StoreError>;

    /// The serialized `pending -> building` transition. Exactly one caller
    /// wins; losers get [`StoreError::Conflict`] and must drop the job.
    /// Sets `started_at` and appends `log_line`.
    async fn claim(&self, id: Uuid, log_line: &str) -> Result<BuildJob, StoreError>;

    /// Applies a validated status transition, appending `log_delta` and
    /// stamping `completed_at` on terminal states. Transitions out of
    /// terminal states are rejected.
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<BuildJob, StoreError>;

    /// Records the target image before dispatch.
    async fn set_image_ref(&self, id: Uuid, image_ref: &str) -> Result<(), StoreError>;

    /// Appends to the job log without an application-level read.
    async fn append_logs(&self, id: Uuid, delta: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_update_requires_image() {
        let update = StatusUpdate::new(BuildStatus::Success);
        assert!(update.validate().is_err());

        let update = StatusUpdate::new(BuildStatus::Success).with_image("reg.local/f:1");
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_failed_update_requires_error() {
        let update = StatusUpdate::new(BuildStatus::Failed);
        assert!(update.validate().is_err());

        let update = StatusUpdate::new(BuildStatus::Failed).with_error("boom");
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_intermediate_updates_need_nothing() {
        assert!(StatusUpdate::new(BuildStatus::Pushing).validate().is_ok());
        assert!(StatusUpdate::new(BuildStatus::Building).validate().is_ok());
    }
}
