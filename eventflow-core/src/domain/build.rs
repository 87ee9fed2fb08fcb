//! Build job domain types
//!
//! Structure shared between the store (persists) and the builder worker
//! (claims and updates). The status transition graph lives here so every
//! store backend enforces the same state machine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One source-to-image build attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: Uuid,
    /// Owner scope; all lookups from outside the system are tenant-scoped.
    pub tenant_id: String,
    /// Tenant's isolation boundary on the orchestrator.
    pub namespace: String,
    pub function_name: String,
    pub runtime: Runtime,
    pub source: SourceSpec,
    /// Fully-qualified target image, assigned before dispatch.
    pub image_ref: Option<String>,
    pub status: BuildStatus,
    /// Populated on success (and while pushing).
    pub image: Option<String>,
    /// Populated only on failure.
    pub error: Option<String>,
    /// Append-only narrative of worker progress.
    pub logs: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Build job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Queued,
    Building,
    Pushing,
    Success,
    Failed,
}

impl BuildStatus {
    /// Returns true if no further transitions are allowed from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }

    /// Statuses a job may be in immediately before entering `self`.
    ///
    /// The worker claims `pending -> building` directly; `queued` remains a
    /// valid intermediate hop for callers that stage jobs explicitly. Any
    /// non-terminal status may move to `failed`.
    pub fn allowed_from(&self) -> &'static [BuildStatus] {
        match self {
            BuildStatus::Pending => &[],
            BuildStatus::Queued => &[BuildStatus::Pending],
            BuildStatus::Building => &[BuildStatus::Pending, BuildStatus::Queued],
            BuildStatus::Pushing => &[BuildStatus::Building],
            BuildStatus::Success => &[BuildStatus::Pushing],
            BuildStatus::Failed => &[
                BuildStatus::Pending,
                BuildStatus::Queued,
                BuildStatus::Building,
                BuildStatus::Pushing,
            ],
        }
    }

    /// Validates a transition from `from` into `self`.
    pub fn validate_transition(&self, from: BuildStatus) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::Terminal { from, to: *self });
        }
        if !self.allowed_from().contains(&from) {
            return Err(TransitionError::Forbidden { from, to: *self });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Queued => "queued",
            BuildStatus::Building => "building",
            BuildStatus::Pushing => "pushing",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected build status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job is already terminal ({from}), cannot move to {to}")]
    Terminal { from: BuildStatus, to: BuildStatus },
    #[error("transition {from} -> {to} is not allowed")]
    Forbidden { from: BuildStatus, to: BuildStatus },
}

/// Where the function source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    /// Shallow clone of `url` at `reference`.
    Git {
        url: String,
        #[serde(default = "default_git_reference")]
        reference: String,
    },
    /// Download and extract a tarball.
    Tar { url: String },
    /// Literal source code written to the runtime's canonical path.
    Inline { code: String },
}

fn default_git_reference() -> String {
    "main".to_string()
}

impl SourceSpec {
    pub fn git(url: impl Into<String>, reference: impl Into<String>) -> Self {
        SourceSpec::Git {
            url: url.into(),
            reference: reference.into(),
        }
    }

    pub fn inline(code: impl Into<String>) -> Self {
        SourceSpec::Inline { code: code.into() }
    }
}

/// Supported function runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Python,
    Nodejs,
    Go,
    Java,
    #[serde(other)]
    Auto,
}

impl Runtime {
    /// Lenient parse: anything outside the supported set builds with the
    /// default builder, so unknown tags map to `Auto` instead of erroring.
    pub fn parse(s: &str) -> Runtime {
        match s {
            "python" => Runtime::Python,
            "nodejs" => Runtime::Nodejs,
            "go" => Runtime::Go,
            "java" => Runtime::Java,
            _ => Runtime::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Python => "python",
            Runtime::Nodejs => "nodejs",
            Runtime::Go => "go",
            Runtime::Java => "java",
            Runtime::Auto => "auto",
        }
    }

    /// Canonical file name for inline source, per runtime.
    pub fn source_file(&self) -> &'static str {
        match self {
            Runtime::Python => "main.py",
            Runtime::Nodejs => "handler.js",
            Runtime::Go => "main.go",
            Runtime::Java => "Main.java",
            Runtime::Auto => "main.py",
        }
    }

    /// Cloud Native Buildpacks builder image for this runtime.
    ///
    /// Go gets the tiny builder; everything else, including `auto`, falls
    /// back to the base builder.
    pub fn builder_image(&self) -> &'static str {
        match self {
            Runtime::Go => "paketobuildpacks/builder-jammy-tiny",
            _ => "paketobuildpacks/builder-jammy-base",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BuildJob {
    /// Default image reference for a job: `<registry>/<namespace>-<function>:<id8>`.
    pub fn default_image_ref(&self, registry: &str) -> String {
        let id = self.id.simple().to_string();
        format!(
            "{}/{}-{}:{}",
            registry,
            self.namespace,
            self.function_name,
            &id[..8]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(BuildStatus::Queued
            .validate_transition(BuildStatus::Pending)
            .is_ok());
        assert!(BuildStatus::Building
            .validate_transition(BuildStatus::Pending)
            .is_ok());
        assert!(BuildStatus::Building
            .validate_transition(BuildStatus::Queued)
            .is_ok());
        assert!(BuildStatus::Pushing
            .validate_transition(BuildStatus::Building)
            .is_ok());
        assert!(BuildStatus::Success
            .validate_transition(BuildStatus::Pushing)
            .is_ok());
    }

    #[test]
    fn test_any_non_terminal_can_fail() {
        for from in [
            BuildStatus::Pending,
            BuildStatus::Queued,
            BuildStatus::Building,
            BuildStatus::Pushing,
        ] {
            assert!(BuildStatus::Failed.validate_transition(from).is_ok());
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for from in [BuildStatus::Success, BuildStatus::Failed] {
            for to in [
                BuildStatus::Pending,
                BuildStatus::Queued,
                BuildStatus::Building,
                BuildStatus::Pushing,
                BuildStatus::Success,
                BuildStatus::Failed,
            ] {
                assert!(matches!(
                    to.validate_transition(from),
                    Err(TransitionError::Terminal { .. })
                ));
            }
        }
    }

    #[test]
    fn test_skipping_states_is_forbidden() {
        // building -> success must pass through pushing
        assert!(matches!(
            BuildStatus::Success.validate_transition(BuildStatus::Building),
            Err(TransitionError::Forbidden { .. })
        ));
        // pending -> pushing skips building
        assert!(matches!(
            BuildStatus::Pushing.validate_transition(BuildStatus::Pending),
            Err(TransitionError::Forbidden { .. })
        ));
        // no transitions back into pending
        assert!(matches!(
            BuildStatus::Pending.validate_transition(BuildStatus::Queued),
            Err(TransitionError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_runtime_parse_is_lenient() {
        assert_eq!(Runtime::parse("go"), Runtime::Go);
        assert_eq!(Runtime::parse("python"), Runtime::Python);
        assert_eq!(Runtime::parse("ruby"), Runtime::Auto);
        assert_eq!(Runtime::parse(""), Runtime::Auto);
    }

    #[test]
    fn test_builder_image_table() {
        assert_eq!(
            Runtime::Go.builder_image(),
            "paketobuildpacks/builder-jammy-tiny"
        );
        assert_eq!(
            Runtime::Python.builder_image(),
            "paketobuildpacks/builder-jammy-base"
        );
        assert_eq!(
            Runtime::Auto.builder_image(),
            "paketobuildpacks/builder-jammy-base"
        );
    }

    #[test]
    fn test_source_spec_git_default_reference() {
        let source: SourceSpec =
            serde_json::from_str(r#"{"kind":"git","url":"https://example/repo"}"#).unwrap();
        assert_eq!(
            source,
            SourceSpec::git("https://example/repo", "main")
        );
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&BuildStatus::Building).unwrap(),
            r#""building""#
        );
        let status: BuildStatus = serde_json::from_str(r#""success""#).unwrap();
        assert_eq!(status, BuildStatus::Success);
    }
}
