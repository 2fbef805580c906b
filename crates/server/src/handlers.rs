//! HTTP handlers.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::{Extension, Json};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

use common::{Job, JobStore, JobSummary, StreamEvent};

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;
use crate::stream::{pump_job_events, sse_response};

/// Events buffered per client before the producer awaits the consumer.
const STREAM_BUFFER: usize = 64;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Submit a zip and stream the job's events; the first event carries the id
/// so the client can reconnect from another terminal.
pub async fn submit_stream(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ServerError> {
    let job = persist_submission(&state, &user.id, multipart).await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let job_id = job.id.clone();
    tokio::spawn(async move {
        if tx
            .send(StreamEvent::JobId {
                job_id: job_id.clone(),
            })
            .await
            .is_err()
        {
            return;
        }
        pump_job_events(state, job_id, true, tx).await;
    });

    Ok(sse_response(rx))
}

/// Submit a zip and return the job id immediately.
pub async fn submit_async(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    let job = persist_submission(&state, &user.id, multipart).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job.id }))))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<JobSummary>>, ServerError> {
    let jobs = state.store.list_jobs(Some(&user.id)).await?;
    Ok(Json(jobs.iter().map(Job::summary).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<JobSummary>, ServerError> {
    let job = state
        .store
        .get_job(&id, Some(&user.id))
        .await?
        .ok_or(ServerError::NotFound)?;
    Ok(Json(job.summary()))
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub from_beginning: bool,
}

/// Stream a job's log events. Ownership is checked before the stream opens;
/// an unknown id and someone else's id are indistinguishable.
pub async fn stream_job(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ServerError> {
    let job = state
        .store
        .get_job(&id, Some(&user.id))
        .await?
        .ok_or(ServerError::NotFound)?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(pump_job_events(
        state.clone(),
        job.id,
        params.from_beginning,
        tx,
    ));
    Ok(sse_response(rx))
}

/// Read the uploaded zip out of the multipart body, stash it in the spool
/// directory, and persist the queued job. The controller takes it from here.
async fn persist_submission(
    state: &AppState,
    user_id: &str,
    mut multipart: Multipart,
) -> Result<Job, ServerError> {
    let mut payload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::Upload(e.status(), e.body_text()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ServerError::Upload(e.status(), e.body_text()))?;
            payload = Some(bytes);
            break;
        }
    }
    let Some(bytes) = payload else {
        return Err(ServerError::InvalidInput(
            "multipart field 'file' is required".to_string(),
        ));
    };

    tokio::fs::create_dir_all(&state.config.spool_dir)
        .await
        .map_err(|e| ServerError::Internal(format!("failed to create spool dir: {e}")))?;

    let mut job = Job::queued(user_id, "");
    let stash = state
        .config
        .spool_dir
        .join(format!("kiln-job-{}.zip", job.id));
    tokio::fs::write(&stash, &bytes)
        .await
        .map_err(|e| ServerError::Internal(format!("failed to stash upload: {e}")))?;
    job.zip_file_path = Some(stash.to_string_lossy().into_owned());

    state.store.create_job(&job).await?;
    info!(
        "Job {} queued for user {} ({} bytes)",
        job.id,
        user_id,
        bytes.len()
    );
    Ok(job)
}
