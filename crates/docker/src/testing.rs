//! In-memory [`ContainerRuntime`] for tests. Containers are plain records;
//! log "streams" replay canned lines and end.

use async_trait::async_trait;
use futures::stream;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{DockerError, Result};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerStatus, LogStream};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    job_id: String,
    status: ContainerStatus,
    exit_code: Option<i64>,
    logs: Vec<String>,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    created: Vec<(String, PathBuf)>,
    removed: Vec<String>,
    fail_create: Option<String>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container as if a previous controller run had created it.
    pub fn add_container(
        &self,
        job_id: &str,
        status: ContainerStatus,
        exit_code: Option<i64>,
        logs: &[&str],
    ) -> String {
        let id = format!("fake-{job_id}");
        let mut state = self.state.lock().unwrap();
        state.containers.insert(
            job_id.to_string(),
            FakeContainer {
                id: id.clone(),
                job_id: job_id.to_string(),
                status,
                exit_code,
                logs: logs.iter().map(|s| s.to_string()).collect(),
            },
        );
        id
    }

    /// Flip an existing container's observed state.
    pub fn set_status(&self, job_id: &str, status: ContainerStatus, exit_code: Option<i64>) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(job_id) {
            c.status = status;
            c.exit_code = exit_code;
        }
    }

    /// Make the next `create_container` calls fail with `reason`.
    pub fn fail_creates(&self, reason: &str) {
        self.state.lock().unwrap().fail_create = Some(reason.to_string());
    }

    /// Workspaces passed to successful `create_container` calls.
    pub fn created(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().created.clone()
    }

    /// Containers removed so far (by id or name, as the caller passed them).
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn has_container(&self, job_id: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(job_id)
    }

    fn resolve(&self, container: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .values()
            .find(|c| c.id == container || c.job_id == container || container.ends_with(&c.job_id))
            .map(|c| c.job_id.clone())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, job_id: &str, workspace: &Path) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_create.clone() {
            return Err(DockerError::ContainerError(reason));
        }

        let id = format!("fake-{job_id}");
        state.containers.insert(
            job_id.to_string(),
            FakeContainer {
                id: id.clone(),
                job_id: job_id.to_string(),
                status: ContainerStatus::Created,
                exit_code: None,
                logs: Vec::new(),
            },
        );
        state.created.push((job_id.to_string(), workspace.to_path_buf()));
        Ok(id)
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        let job_id = self
            .resolve(container)
            .ok_or_else(|| DockerError::ContainerError(format!("no such container: {container}")))?;
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(&job_id) {
            c.status = ContainerStatus::Running;
        }
        Ok(())
    }

    async fn inspect_job_container(&self, job_id: &str) -> Result<Option<ContainerInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(job_id).map(|c| ContainerInfo {
            id: c.id.clone(),
            job_id: c.job_id.clone(),
            status: c.status,
            exit_code: c.exit_code,
        }))
    }

    async fn list_job_containers(&self) -> Result<Vec<ContainerInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .map(|c| ContainerInfo {
                id: c.id.clone(),
                job_id: c.job_id.clone(),
                status: c.status,
                exit_code: c.exit_code,
            })
            .collect())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        let job_id = self.resolve(container);
        let mut state = self.state.lock().unwrap();
        state.removed.push(container.to_string());
        if let Some(job_id) = job_id {
            state.containers.remove(&job_id);
        }
        Ok(())
    }

    async fn container_logs(&self, container: &str, _follow: bool) -> Result<LogStream> {
        let job_id = self
            .resolve(container)
            .ok_or_else(|| DockerError::ContainerError(format!("no such container: {container}")))?;
        let lines: Vec<Result<String>> = {
            let state = self.state.lock().unwrap();
            state.containers[&job_id].logs.iter().cloned().map(Ok).collect()
        };
        Ok(Box::pin(stream::iter(lines)))
    }
}
