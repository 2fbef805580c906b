use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use futures_util::stream::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DockerError, Result};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerStatus, LogStream};

/// Default image the test command runs in.
pub const DEFAULT_IMAGE: &str = "python:3.12-slim";

/// Default command: install the submission's dependencies, then run its test
/// suite with verbose output on stdout. The exit status is the job verdict.
pub const DEFAULT_RUN_COMMAND: &str = "pip install -q -r requirements.txt && python -m pytest -v";

/// Mount point of the extracted project tree inside the container.
const WORKSPACE_MOUNT: &str = "/workspace";

/// Bollard-backed container runtime. Containers are named
/// `{prefix}{job_id}` so that concurrent deployments on one Docker host
/// never touch each other's containers.
pub struct DockerRuntime {
    docker: Docker,
    prefix: String,
    image: String,
    run_command: String,
}

impl DockerRuntime {
    pub fn new(
        prefix: impl Into<String>,
        image: impl Into<String>,
        run_command: impl Into<String>,
    ) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::ConnectionError(e.to_string()))?;

        Ok(Self {
            docker,
            prefix: prefix.into(),
            image: image.into(),
            run_command: run_command.into(),
        })
    }

    pub fn container_name(&self, job_id: &str) -> String {
        format!("{}{}", self.prefix, job_id)
    }

    /// Recover the job id from a container name. Docker reports names with a
    /// leading slash; anything that does not carry our prefix and a UUID
    /// suffix belongs to someone else.
    fn job_id_from_name(prefix: &str, container_name: &str) -> Option<String> {
        let name = container_name.strip_prefix('/').unwrap_or(container_name);
        let candidate = name.strip_prefix(prefix)?;
        Uuid::parse_str(candidate).ok()?;
        Some(candidate.to_string())
    }

    /// Pull the configured image if the local daemon does not have it yet.
    async fn ensure_image(&self) -> Result<()> {
        match self.docker.inspect_image(&self.image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }

        debug!("Pulling image {}", self.image);
        let options = Some(CreateImageOptions {
            from_image: Some(self.image.clone()),
            ..Default::default()
        });

        let mut pull_stream = self.docker.create_image(options, None, None);
        while let Some(progress) = pull_stream.try_next().await? {
            if let Some(status) = progress.status {
                debug!("Pull progress: {}", status);
            }
        }
        Ok(())
    }

    async fn inspect_by_name(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let response = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let container_name = response.name.unwrap_or_else(|| name.to_string());
        let Some(job_id) = Self::job_id_from_name(&self.prefix, &container_name) else {
            return Ok(None);
        };

        let state = response.state.unwrap_or_default();
        let status = match state.status {
            Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
            Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
            Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
            Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Restarting,
            Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Removing,
            Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
            Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
            _ => {
                warn!(
                    "Container {} reported no status, treating as dead",
                    container_name
                );
                ContainerStatus::Dead
            }
        };

        Ok(Some(ContainerInfo {
            id: response.id.unwrap_or_else(|| name.to_string()),
            job_id,
            status,
            exit_code: state.exit_code,
        }))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, job_id: &str, workspace: &Path) -> Result<String> {
        self.ensure_image().await?;

        let name = self.container_name(job_id);
        debug!("Creating container {} from image {}", name, self.image);

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:ro",
                workspace.display(),
                WORKSPACE_MOUNT
            )]),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                self.run_command.clone(),
            ]),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = Some(CreateContainerOptions {
            name: Some(name),
            platform: String::new(),
        });

        let container = self.docker.create_container(create_options, body).await?;
        Ok(container.id)
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.docker
            .start_container(container, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn inspect_job_container(&self, job_id: &str) -> Result<Option<ContainerInfo>> {
        let name = self.container_name(job_id);
        self.inspect_by_name(&name).await
    }

    async fn list_job_containers(&self) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![self.prefix.clone()]);

        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;

        let mut containers = Vec::new();
        for summary in summaries {
            let Some(names) = summary.names else { continue };
            let Some(job_id) = names
                .iter()
                .find_map(|n| Self::job_id_from_name(&self.prefix, n))
            else {
                continue;
            };
            // Inspect for the authoritative state and exit code; the
            // container may vanish between list and inspect.
            if let Some(info) = self.inspect_job_container(&job_id).await? {
                containers.push(info);
            }
        }

        Ok(containers)
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });

        match self.docker.remove_container(container, options).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn container_logs(&self, container: &str, follow: bool) -> Result<LogStream> {
        let options = Some(LogsOptions {
            stdout: true,
            stderr: true,
            since: 0,
            until: 0,
            timestamps: false,
            follow,
            tail: "all".to_string(),
        });

        let stream = self
            .docker
            .logs(container, options)
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        Some(Ok(String::from_utf8_lossy(&message).into_owned()))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(DockerError::from(e))),
                }
            });

        Ok(Box::pin(stream))
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = "0e37df36-f698-11e6-8dd4-cb9ced3df976";

    #[test]
    fn job_id_recovery_from_names() {
        assert_eq!(
            DockerRuntime::job_id_from_name("kiln-", &format!("/kiln-{JOB}")),
            Some(JOB.to_string())
        );
        // Without the leading slash too.
        assert_eq!(
            DockerRuntime::job_id_from_name("kiln-", &format!("kiln-{JOB}")),
            Some(JOB.to_string())
        );
    }

    #[test]
    fn foreign_containers_are_ignored() {
        // Wrong prefix.
        assert_eq!(
            DockerRuntime::job_id_from_name("kiln-", &format!("/other-{JOB}")),
            None
        );
        // Right prefix, not a UUID.
        assert_eq!(
            DockerRuntime::job_id_from_name("kiln-", "/kiln-postgres"),
            None
        );
        // A user's unrelated container.
        assert_eq!(DockerRuntime::job_id_from_name("kiln-", "/postgres"), None);
    }

    #[test]
    fn empty_prefix_accepts_bare_uuids() {
        assert_eq!(
            DockerRuntime::job_id_from_name("", &format!("/{JOB}")),
            Some(JOB.to_string())
        );
        assert_eq!(DockerRuntime::job_id_from_name("", "/postgres"), None);
    }
}
