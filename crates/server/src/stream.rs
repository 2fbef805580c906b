//! Log streaming: one producer task per connected client.
//!
//! Each client owns an independent reader of the runtime's log stream; the
//! events flow through an mpsc channel into the SSE response. When the
//! client disconnects the channel closes, the send fails, and the producer
//! (with its runtime log stream) is dropped.

use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use common::{EventKind, JobStatus, JobStore, StreamEvent};
use docker::ContainerRuntime;

use crate::app::AppState;
use crate::error::ServerError;

/// Poll cadence while a job is still queued.
const QUEUE_POLL: Duration = Duration::from_millis(500);

/// After a follow stream ends, how long to wait for the controller to record
/// the verdict before giving up.
const FINALIZE_WAIT: Duration = Duration::from_secs(5);
const FINALIZE_POLL: Duration = Duration::from_millis(100);

/// Wrap a receiver of [`StreamEvent`]s as an SSE response.
pub fn sse_response(
    rx: mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    Sse::new(ReceiverStream::new(rx).map(|event| Event::default().json_data(&event)))
}

/// Producer task body: push the job's events into `tx` until the terminal
/// event or client disconnect. Never panics the task; stream-level failures
/// degrade to a failure `complete` event.
pub async fn pump_job_events(state: AppState, job_id: String, from_beginning: bool, tx: mpsc::Sender<StreamEvent>) {
    if let Err(e) = stream_job(&state, &job_id, from_beginning, &tx).await {
        warn!("Stream for job {} ended with error: {}", job_id, e);
        let _ = tx
            .send(StreamEvent::Log {
                data: format!("Error streaming logs: {e}\n"),
            })
            .await;
        let _ = tx.send(StreamEvent::Complete { success: false }).await;
    }
}

async fn stream_job(
    state: &AppState,
    job_id: &str,
    from_beginning: bool,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), ServerError> {
    // Wait for the controller to pick the job up.
    let deadline = Instant::now() + state.config.queue_wait;
    let job = loop {
        let Some(job) = state.store.get_job(job_id, None).await? else {
            let _ = tx
                .send(StreamEvent::Log {
                    data: "Job disappeared.\n".to_string(),
                })
                .await;
            let _ = tx.send(StreamEvent::Complete { success: false }).await;
            return Ok(());
        };
        if job.status != JobStatus::Queued {
            break job;
        }
        if Instant::now() >= deadline {
            let _ = tx
                .send(StreamEvent::Log {
                    data: "Timed out waiting for job to start.\n".to_string(),
                })
                .await;
            let _ = tx.send(StreamEvent::Complete { success: false }).await;
            return Ok(());
        }
        sleep(QUEUE_POLL).await;
    };

    // Terminal: replay if asked, then the verdict. A job whose container is
    // already gone still gets its persisted events and the terminal event.
    if job.status.is_terminal() {
        if from_beginning {
            if let Some(container_id) = job.container_id.as_deref() {
                match state.runtime.container_logs(container_id, false).await {
                    Ok(mut logs) => {
                        while let Some(chunk) = logs.next().await {
                            match chunk {
                                Ok(data) => {
                                    if tx.send(StreamEvent::Log { data }).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                // Container removed mid-read; the persisted
                                // events below still tell the story.
                                Err(_) => break,
                            }
                        }
                    }
                    Err(_) => {} // container already removed
                }
            }
            for event in state
                .store
                .job_events(&job.id)
                .await?
                .iter()
                .filter(|e| e.kind == EventKind::Log)
            {
                if tx.send(StreamEvent::from(event)).await.is_err() {
                    return Ok(());
                }
            }
        } else if tx
            .send(StreamEvent::Log {
                data: "Job already completed.\n".to_string(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        let _ = tx
            .send(StreamEvent::Complete {
                success: job.success.unwrap_or(false),
            })
            .await;
        return Ok(());
    }

    // Running: follow the container until its stream ends.
    if let Some(container_id) = job.container_id.as_deref() {
        match state.runtime.container_logs(container_id, true).await {
            Ok(mut logs) => {
                while let Some(chunk) = logs.next().await {
                    match chunk {
                        Ok(data) => {
                            if tx.send(StreamEvent::Log { data }).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(StreamEvent::Log {
                                    data: format!("Error streaming logs: {e}\n"),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Log {
                        data: format!("Error streaming logs: {e}\n"),
                    })
                    .await;
            }
        }
    }

    // The stream ended; give the reconciliation loop a moment to record the
    // verdict, then report it.
    let deadline = Instant::now() + FINALIZE_WAIT;
    let success = loop {
        match state.store.get_job(job_id, None).await? {
            None => break false,
            Some(job) => {
                if let Some(success) = job.success {
                    break success;
                }
            }
        }
        if Instant::now() >= deadline {
            break false;
        }
        sleep(FINALIZE_POLL).await;
    };
    let _ = tx.send(StreamEvent::Complete { success }).await;
    Ok(())
}
