//! Build task construction
//!
//! A build is materialized as a short-lived workload with three containers
//! on a shared workspace volume:
//!
//! - `fetch` (init) populates `/workspace` from the job's source
//! - `dind` (sidecar) is a privileged container-runtime daemon on a local
//!   TCP endpoint
//! - `pack` (main) waits for the daemon, then runs the Cloud Native
//!   Buildpacks executor against the workspace and publishes the result to
//!   the target registry
//!
//! The workload never restarts and never retries inside the orchestrator;
//! the worker owns the retry policy.

use std::collections::BTreeMap;

use eventflow_cluster::{
    BuildTaskSpec, ContainerSpec, RestartPolicy, Volume, VolumeSource,
};
use eventflow_core::domain::build::{BuildJob, SourceSpec};

use crate::config::Config;

const WORKSPACE_VOLUME: &str = "workspace";
const WORKSPACE_PATH: &str = "/workspace";
const REGISTRY_SECRET: &str = "registry-credentials";
const DOCKER_HOST: &str = "tcp://localhost:2375";
const TTL_AFTER_FINISHED_SECS: u32 = 600;

/// Name of the build task for a job.
pub fn task_name(job: &BuildJob) -> String {
    format!("build-{}", job.id)
}

/// Constructs the build workload for a claimed job.
pub fn build_task(job: &BuildJob, image_ref: &str, config: &Config) -> BuildTaskSpec {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "builder".to_string());
    labels.insert("build-id".to_string(), job.id.to_string());

    BuildTaskSpec {
        name: task_name(job),
        namespace: job.namespace.clone(),
        labels,
        service_account: config.service_account.clone(),
        backoff_limit: 0,
        ttl_after_finished_secs: TTL_AFTER_FINISHED_SECS,
        restart_policy: RestartPolicy::Never,
        init_containers: vec![fetch_container(job)],
        containers: vec![pack_container(job, image_ref), dind_container(config)],
        volumes: vec![
            Volume {
                name: WORKSPACE_VOLUME.to_string(),
                source: VolumeSource::Ephemeral,
            },
            Volume {
                name: REGISTRY_SECRET.to_string(),
                source: VolumeSource::Secret {
                    secret_name: REGISTRY_SECRET.to_string(),
                },
            },
        ],
    }
}

/// Init container that populates the workspace from the job source.
fn fetch_container(job: &BuildJob) -> ContainerSpec {
    match &job.source {
        SourceSpec::Git { url, reference } => {
            ContainerSpec::new("fetch", "alpine/git:2.45.2")
                .with_command(vec!["git".to_string()])
                .with_args(vec![
                    "clone".to_string(),
                    "--depth".to_string(),
                    "1".to_string(),
                    "--branch".to_string(),
                    reference.clone(),
                    url.clone(),
                    WORKSPACE_PATH.to_string(),
                ])
                .with_mount(WORKSPACE_VOLUME, WORKSPACE_PATH)
        }
        SourceSpec::Tar { url } => ContainerSpec::new("fetch", "busybox:1.36")
            .with_command(vec!["sh".to_string(), "-c".to_string()])
            .with_args(vec![format!(
                "wget -O /tmp/source.tar.gz {url} && tar -xzf /tmp/source.tar.gz -C {WORKSPACE_PATH}"
            )])
            .with_mount(WORKSPACE_VOLUME, WORKSPACE_PATH),
        SourceSpec::Inline { code } => {
            let file = job.runtime.source_file();
            ContainerSpec::new("fetch", "busybox:1.36")
                .with_command(vec!["sh".to_string(), "-c".to_string()])
                .with_args(vec![format!(
                    "printf '%s' \"$SOURCE_CODE\" > {WORKSPACE_PATH}/{file}"
                )])
                .with_env("SOURCE_CODE", code.clone())
                .with_mount(WORKSPACE_VOLUME, WORKSPACE_PATH)
        }
    }
}

/// Privileged container-runtime daemon the buildpack executor builds against.
fn dind_container(config: &Config) -> ContainerSpec {
    ContainerSpec::new("dind", "docker:27-dind")
        .with_args(vec![
            "--host=tcp://0.0.0.0:2375".to_string(),
            "--tls=false".to_string(),
            format!("--insecure-registry={}", config.registry),
        ])
        .with_env("DOCKER_TLS_CERTDIR", "")
        .privileged()
}

/// Main container: waits for the daemon, then builds and publishes.
fn pack_container(job: &BuildJob, image_ref: &str) -> ContainerSpec {
    let builder = job.runtime.builder_image();
    let script = format!(
        "while ! nc -z localhost 2375; do sleep 1; done; \
         pack build {image_ref} --path {WORKSPACE_PATH} --builder {builder} --publish"
    );

    ContainerSpec::new("pack", "buildpacksio/pack:0.35.1")
        .with_command(vec!["/bin/sh".to_string(), "-c".to_string()])
        .with_args(vec![script])
        .with_env("DOCKER_HOST", DOCKER_HOST)
        .with_mount(WORKSPACE_VOLUME, WORKSPACE_PATH)
        .with_mount(REGISTRY_SECRET, "/root/.docker")
}
