use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use common::{Job, JobStatus, JobStore};
use docker::{ContainerInfo, ContainerRuntime, ContainerStatus};

use crate::error::{ControllerError, Result};
use crate::workspace;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Seconds between reconciliation passes.
    pub reconcile_interval: Duration,
    /// Upper bound on any single per-job action within a pass.
    pub op_timeout: Duration,
    /// Root for per-job extraction directories.
    pub scratch_dir: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(2),
            op_timeout: Duration::from_secs(30),
            scratch_dir: std::env::temp_dir().join("kiln-scratch"),
        }
    }
}

/// Reconciles job state in the store with container state in the runtime.
///
/// Exactly one controller may run against a given store; the operator
/// enforces that. Within a pass, jobs are handled independently: one job's
/// failure is logged and never blocks the others.
pub struct Controller {
    store: Arc<dyn JobStore>,
    runtime: Arc<dyn ContainerRuntime>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn JobStore>,
        runtime: Arc<dyn ContainerRuntime>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            config,
        }
    }

    /// Run the reconciliation loop until the surrounding task is dropped.
    /// The first pass runs immediately, which is also what recovers from a
    /// crash: steady state and recovery are the same algorithm.
    pub async fn run(&self) {
        info!(
            "Job controller started (interval {:?})",
            self.config.reconcile_interval
        );
        loop {
            if let Err(e) = self.reconcile_once().await {
                error!("Error in reconciliation pass: {}", e);
            }
            sleep(self.config.reconcile_interval).await;
        }
    }

    /// One reconciliation pass over the full snapshot.
    pub async fn reconcile_once(&self) -> Result<()> {
        let jobs = self.store.list_jobs(None).await?;
        let containers = self.runtime.list_job_containers().await?;
        let observed: HashMap<String, ContainerInfo> = containers
            .iter()
            .map(|c| (c.job_id.clone(), c.clone()))
            .collect();
        debug!(
            "Reconciliation snapshot: {} jobs, {} containers",
            jobs.len(),
            containers.len()
        );

        // Settle running jobs first, freeing runtime capacity.
        for job in jobs.iter().filter(|j| j.status == JobStatus::Running) {
            if let Err(e) = self
                .bounded(self.reconcile_running(job, observed.get(&job.id)))
                .await
            {
                error!("Error reconciling job {}: {}", job.id, e);
            }
        }

        // Release the resources of finished jobs.
        for job in jobs.iter().filter(|j| j.status.is_terminal()) {
            if let Err(e) = self
                .bounded(self.cleanup_terminal(job, observed.get(&job.id)))
                .await
            {
                error!("Error cleaning up job {}: {}", job.id, e);
            }
        }

        // Launch queued jobs, oldest submission first (listing is newest-first).
        for job in jobs.iter().filter(|j| j.status == JobStatus::Queued).rev() {
            if let Some(stale) = observed.get(&job.id) {
                // A container exists for a job the store still thinks is
                // queued: a previous attempt died between create and the
                // status update. Remove it; the next pass recreates cleanly.
                warn!("Job {} is queued but has container {}, removing", job.id, stale.id);
                if let Err(e) = self.bounded(self.runtime.remove_container(&stale.id)).await {
                    error!("Error removing stale container for job {}: {}", job.id, e);
                }
                continue;
            }
            if let Err(e) = self.bounded(self.start_job(job)).await {
                error!("Error starting job {}: {}", job.id, e);
            }
        }

        // Orphan cleanup: containers in our namespace with no job row.
        let known: HashSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        for container in containers.iter().filter(|c| !known.contains(c.job_id.as_str())) {
            warn!(
                "Found orphaned container {} (job {}), removing",
                container.id, container.job_id
            );
            if let Err(e) = self.bounded(self.runtime.remove_container(&container.id)).await {
                error!("Error removing orphaned container {}: {}", container.id, e);
            }
        }

        Ok(())
    }

    /// Wrap a per-job action so a hung runtime call cannot stall the pass.
    async fn bounded<T, F, E>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<ControllerError>,
    {
        match timeout(self.config.op_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ControllerError::Timeout(self.config.op_timeout)),
        }
    }

    async fn reconcile_running(&self, job: &Job, container: Option<&ContainerInfo>) -> Result<()> {
        match container {
            None => {
                error!("Container for running job {} disappeared", job.id);
                self.store
                    .fail_job(&job.id, "Container lost during execution", Utc::now())
                    .await?;
            }
            Some(c) if c.status.has_exited() => {
                let success = c.exit_code == Some(0);
                self.store.complete_job(&job.id, success, Utc::now()).await?;
                info!("Job {} finished with success={}", job.id, success);
            }
            Some(c) if c.status == ContainerStatus::Removing => {
                self.store
                    .fail_job(&job.id, "Container entered bad state: removing", Utc::now())
                    .await?;
            }
            Some(_) => {} // still running
        }
        Ok(())
    }

    /// Create and start the container for a queued job. Any preparation or
    /// runtime failure marks the job failed with the reason as its final
    /// event; only store errors propagate.
    async fn start_job(&self, job: &Job) -> Result<()> {
        let Some(zip_path) = job.zip_file_path.as_deref() else {
            return self.fail(job, "No stashed submission for job").await;
        };
        if tokio::fs::metadata(zip_path).await.is_err() {
            return self
                .fail(job, &format!("Stashed zip not found: {zip_path}"))
                .await;
        }

        let work = match workspace::extract_submission(&self.config.scratch_dir, &job.id, zip_path)
            .await
        {
            Ok(dir) => dir,
            Err(e @ ControllerError::Store(_)) => return Err(e),
            Err(e) => {
                return self
                    .fail(job, &format!("Failed to prepare workspace: {e}"))
                    .await;
            }
        };

        let container_id = match self.runtime.create_container(&job.id, &work).await {
            Ok(id) => id,
            Err(e) => {
                return self
                    .fail(job, &format!("Failed to create container: {e}"))
                    .await;
            }
        };

        if let Err(e) = self.runtime.start_container(&container_id).await {
            return self
                .fail(job, &format!("Failed to start container: {e}"))
                .await;
        }

        self.store
            .update_job_status(&job.id, JobStatus::Running, Some(Utc::now()), Some(&container_id))
            .await?;

        // The container holds the extracted copy now; the stash is consumed.
        if let Err(e) = tokio::fs::remove_file(zip_path).await {
            warn!("Failed to remove stashed zip {}: {}", zip_path, e);
        }

        info!("Job {} started in container {}", job.id, container_id);
        Ok(())
    }

    async fn cleanup_terminal(&self, job: &Job, container: Option<&ContainerInfo>) -> Result<()> {
        if let Some(container) = container {
            debug!("Removing container {} of finished job {}", container.id, job.id);
            self.runtime.remove_container(&container.id).await?;
        }
        if let Some(zip_path) = job.zip_file_path.as_deref() {
            match tokio::fs::remove_file(zip_path).await {
                Ok(()) => debug!("Removed stashed zip {}", zip_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove stashed zip {}: {}", zip_path, e),
            }
        }
        workspace::sweep_scratch(&self.config.scratch_dir, &job.id).await?;
        Ok(())
    }

    async fn fail(&self, job: &Job, reason: &str) -> Result<()> {
        error!("Job {} failed: {}", job.id, reason);
        self.store.fail_job(&job.id, reason, Utc::now()).await?;
        Ok(())
    }
}
