//! The store capability trait: everything the server, controller, and admin
//! CLI need from persistent storage. One implementation is injected at
//! process start; tests run the SQLite implementation against `:memory:`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ApiKey, Job, JobEvent, JobStatus, User};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown id, or an id the caller does not own. Callers cannot tell the
    /// two apart, which keeps ids unenumerable.
    #[error("record not found")]
    NotFound,

    /// Uniqueness violation, e.g. a duplicate email.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    /// Backend I/O failure; retryable.
    #[error("storage unavailable: {0}")]
    Transient(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable, user-scoped persistence of users, credentials, jobs, and events.
///
/// Reads scoped by `user_id` are the authorization boundary: a `None` scope is
/// an administrative read. Every multi-field update commits atomically; no
/// intermediate state is observable.
#[async_trait]
pub trait JobStore: Send + Sync {
    // Users

    /// Insert a user; `Conflict` if the email is already taken.
    async fn create_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn set_user_active(&self, id: &str, active: bool) -> StoreResult<()>;

    // API keys

    async fn create_api_key(&self, key: &ApiKey) -> StoreResult<()>;
    /// O(1) lookup by the hex SHA-256 of the presented secret.
    async fn get_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;
    async fn list_api_keys(&self, user_id: Option<&str>) -> StoreResult<Vec<ApiKey>>;
    /// Flip `is_active` off. Takes effect before the next authenticated request.
    async fn revoke_api_key(&self, id: &str) -> StoreResult<()>;
    /// Best-effort `last_used_at` update.
    async fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    // Jobs

    async fn create_job(&self, job: &Job) -> StoreResult<()>;
    /// `Ok(None)` when the job does not exist or is not owned by `user_id`.
    async fn get_job(&self, id: &str, user_id: Option<&str>) -> StoreResult<Option<Job>>;
    /// Newest first by creation time.
    async fn list_jobs(&self, user_id: Option<&str>) -> StoreResult<Vec<Job>>;
    /// Partial update; rejects transitions that move backwards through the
    /// job state machine.
    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        start_time: Option<DateTime<Utc>>,
        container_id: Option<&str>,
    ) -> StoreResult<()>;
    /// Transition to `completed` with the container's verdict.
    async fn complete_job(&self, id: &str, success: bool, end_time: DateTime<Utc>) -> StoreResult<()>;
    /// Transition to `failed`, recording `reason` as a final log event so it
    /// survives the container.
    async fn fail_job(&self, id: &str, reason: &str, end_time: DateTime<Utc>) -> StoreResult<()>;

    // Job events

    async fn add_job_event(&self, job_id: &str, event: &JobEvent) -> StoreResult<()>;
    /// Events in sequence order.
    async fn job_events(&self, job_id: &str) -> StoreResult<Vec<JobEvent>>;
}
