//! Bus event envelope and payloads
//!
//! Wire format on `eventflow.events`:
//! `{id, type, function, image?, command?, payload, timestamp}`. The payload
//! is carried untyped in the envelope so consumers can filter on `type`
//! before committing to a payload shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::{BuildJob, Runtime};

/// Subject all request events are published on.
pub const EVENTS_SUBJECT: &str = "eventflow.events";

/// Event type emitted when a build job is created.
pub const EVENT_BUILD_CREATED: &str = "build.created";

/// Observational per-build status subject.
pub fn build_status_subject(build_id: Uuid) -> String {
    format!("builds.status.{}", build_id)
}

/// Envelope for all events on `eventflow.events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BusEvent {
    /// Builds the `build.created` event for a freshly inserted job.
    pub fn build_created(job: &BuildJob) -> Self {
        let payload = BuildCreated {
            build_id: job.id,
            function_name: job.function_name.clone(),
            namespace: job.namespace.clone(),
            tenant_id: job.tenant_id.clone(),
            runtime: job.runtime,
        };
        BusEvent {
            id: Uuid::new_v4(),
            event_type: EVENT_BUILD_CREATED.to_string(),
            function: job.function_name.clone(),
            image: None,
            command: None,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Parses the typed `build.created` payload out of the envelope.
    pub fn build_created_payload(&self) -> Result<BuildCreated, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Payload of a `build.created` event.
///
/// The tenant travels as `user_id` on the wire for compatibility with
/// existing consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCreated {
    pub build_id: Uuid,
    pub function_name: String,
    pub namespace: String,
    #[serde(rename = "user_id")]
    pub tenant_id: String,
    pub runtime: Runtime,
}

/// Observational status event published on `builds.status.<build_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStatusEvent {
    pub event: String,
    pub message: String,
    pub strategy: String,
    pub image_ref: Option<String>,
    pub digest: Option<String>,
}

impl BuildStatusEvent {
    pub fn new(event: impl Into<String>, message: impl Into<String>) -> Self {
        BuildStatusEvent {
            event: event.into(),
            message: message.into(),
            strategy: "buildpacks".to_string(),
            image_ref: None,
            digest: None,
        }
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}
