//! The runtime capability trait and the observed-state types it returns.

use async_trait::async_trait;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

use crate::error::Result;

/// A stream of log chunks from one container. Chunks are whatever the
/// runtime hands back; they are not guaranteed to be whole lines.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Container states as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Removing,
    Dead,
}

impl ContainerStatus {
    /// The container's process has stopped and an exit code is available.
    pub fn has_exited(self) -> bool {
        matches!(self, Self::Exited | Self::Dead)
    }
}

/// Observed state of one job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Runtime-assigned container id.
    pub id: String,
    /// The job this container belongs to, recovered from its name.
    pub job_id: String,
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
}

/// What the controller and server need from a container runtime: create,
/// start, inspect, list, remove, and tail logs. Containers belonging to this
/// deployment are recognized by a configurable name prefix, so several
/// deployments can share one host.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) the container for `job_id`, mounting the
    /// prepared project tree read-only. Returns the container id.
    async fn create_container(&self, job_id: &str, workspace: &Path) -> Result<String>;

    /// Start a created container, by id or name.
    async fn start_container(&self, container: &str) -> Result<()>;

    /// Observed state of the container for `job_id`, or `None` if the
    /// runtime has no such container.
    async fn inspect_job_container(&self, job_id: &str) -> Result<Option<ContainerInfo>>;

    /// All containers in this deployment's namespace, running or not.
    async fn list_job_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Force-remove a container, by id or name. Removing an already-gone
    /// container is not an error.
    async fn remove_container(&self, container: &str) -> Result<()>;

    /// Tail a container's combined stdout/stderr. With `follow`, the stream
    /// ends when the container exits; without, it ends after the logs
    /// captured so far.
    async fn container_logs(&self, container: &str, follow: bool) -> Result<LogStream>;
}
