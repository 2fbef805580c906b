//! Domain models shared by the server, controller, and CLIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::StoreError;

/// A user account. Users own API keys and jobs; they are deactivated rather
/// than deleted so that job history stays attributable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            email: email.into(),
            created_at: Utc::now(),
            is_active: true,
        }
    }
}

/// An API key record. Only the SHA-256 hash of the secret is ever stored;
/// the plaintext is shown once at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ApiKey {
    pub fn new(user_id: impl Into<String>, key_hash: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            key_hash: key_hash.into(),
            name,
            created_at: Utc::now(),
            last_used_at: None,
            is_active: true,
        }
    }
}

/// Job lifecycle states.
///
/// Transitions are monotone: `Queued -> Running -> Completed | Failed`, with
/// `Queued -> Failed` for jobs whose container never came up. `Cancelled` is
/// reserved; nothing transitions into it today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `to` is legal. Same-state updates
    /// are tolerated so that a crashed writer can safely repeat itself.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::InvalidInput(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// A CI test job and its execution metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub status: JobStatus,
    /// `None` while the job is queued or running.
    pub success: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    /// Path to the stashed submission zip. The server writes it, the
    /// controller deletes it once the container holds the extracted copy.
    pub zip_file_path: Option<String>,
}

impl Job {
    /// A freshly submitted job, owned by `user_id`, waiting for the
    /// controller to pick it up.
    pub fn queued(user_id: impl Into<String>, zip_file_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            status: JobStatus::Queued,
            success: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            container_id: None,
            zip_file_path: Some(zip_file_path.into()),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            status: self.status,
            success: self.success,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// The listing shape returned by `GET /jobs` and `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub success: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Kind of a persisted job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Log,
    Complete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for EventKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "complete" => Ok(Self::Complete),
            other => Err(StoreError::InvalidInput(format!(
                "unknown event kind: {other}"
            ))),
        }
    }
}

/// A persisted job event. Live log lines stream straight from the container
/// runtime and are not stored; persisted events carry terminal failure
/// reasons so that replay still works after the container is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Monotone per job, assigned by the store.
    pub sequence: i64,
    pub kind: EventKind,
    pub data: Option<String>,
    pub success: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn log(data: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            kind: EventKind::Log,
            data: Some(data.into()),
            success: None,
            timestamp: Utc::now(),
        }
    }

    pub fn complete(success: bool) -> Self {
        Self {
            sequence: 0,
            kind: EventKind::Complete,
            data: None,
            success: Some(success),
            timestamp: Utc::now(),
        }
    }
}
