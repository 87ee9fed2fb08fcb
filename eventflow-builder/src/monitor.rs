//! Build workload monitoring
//!
//! After dispatch, the worker polls the workload status until a terminal
//! outcome or the wall-clock budget runs out. Transient status-fetch errors
//! are retried within the window.

use std::time::Duration;

use eventflow_cluster::{Cluster, TaskStatus};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, warn};

/// Terminal failure of a monitored build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Failed(String),
    #[error("build abandoned on shutdown")]
    Cancelled,
}

/// Polls the build task until it succeeds, fails, times out, or the worker
/// shuts down. Returns the image digest when the task reports one.
pub async fn await_build(
    cluster: &dyn Cluster,
    namespace: &str,
    task_name: &str,
    poll_interval: Duration,
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<String>, BuildError> {
    let deadline = time::Instant::now() + timeout;
    let mut ticker = time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    return Err(BuildError::Cancelled);
                }
                if time::Instant::now() >= deadline {
                    return Err(BuildError::TimedOut(timeout));
                }

                match cluster.build_task_status(namespace, task_name).await {
                    Ok(TaskStatus::Active) => {
                        debug!(%namespace, %task_name, "build still running");
                    }
                    Ok(TaskStatus::Succeeded { digest }) => return Ok(digest),
                    Ok(TaskStatus::Failed { message }) => {
                        return Err(BuildError::Failed(message));
                    }
                    // Transient fetch errors are retried until the deadline.
                    Err(err) => {
                        warn!(%namespace, %task_name, "status fetch failed: {}", err);
                    }
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender means the process is going away too.
                if changed.is_err() || *shutdown.borrow() {
                    return Err(BuildError::Cancelled);
                }
            }
        }
    }
}
