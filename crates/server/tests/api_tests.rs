//! HTTP surface tests: auth, submission, scoping, and streaming.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{ApiKey, Job, JobStatus, JobStore, StreamEvent, User};
use docker::testing::FakeRuntime;
use docker::ContainerStatus;
use server::{router, AppState, ServerConfig};
use storage::SqlStore;

struct Harness {
    app: Router,
    store: Arc<SqlStore>,
    runtime: Arc<FakeRuntime>,
    _tmp: tempfile::TempDir,
    spool: std::path::PathBuf,
}

async fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let spool = tmp.path().join("spool");

    let store = Arc::new(SqlStore::in_memory().await.unwrap());
    let runtime = Arc::new(FakeRuntime::new());
    let state = AppState::new(
        store.clone(),
        runtime.clone(),
        ServerConfig {
            spool_dir: spool.clone(),
            queue_wait: Duration::from_millis(300),
            max_upload_bytes: 1024 * 1024,
        },
    );

    Harness {
        app: router(state),
        store,
        runtime,
        _tmp: tmp,
        spool,
    }
}

/// Provision a user with one API key; returns the user and the plaintext key.
async fn seed_user(store: &SqlStore, name: &str, email: &str) -> (User, String) {
    let user = User::new(name, email);
    store.create_user(&user).await.unwrap();

    let secret = common::generate_api_key();
    let key = ApiKey::new(&user.id, common::hash_api_key(&secret), None);
    store.create_api_key(&key).await.unwrap();
    (user, secret)
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

const BOUNDARY: &str = "kiln-test-boundary";

fn multipart_upload(path: &str, token: &str, field: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
             filename=\"project.zip\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn sse_events(response: axum::response::Response) -> Vec<StreamEvent> {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|payload| serde_json::from_str(payload).unwrap())
        .collect()
}

#[tokio::test]
async fn healthz_needs_no_credential() {
    let h = harness().await;
    let response = h.app.oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn missing_credential_is_unauthorized() {
    let h = harness().await;
    let response = h.app.oneshot(get("/jobs", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let h = harness().await;
    let response = h
        .app
        .oneshot(get("/jobs", Some("ci_not-a-real-key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoked_key_is_unauthorized() {
    let h = harness().await;
    let (user, secret) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let keys = h.store.list_api_keys(Some(&user.id)).await.unwrap();
    h.store.revoke_api_key(&keys[0].id).await.unwrap();

    let response = h.app.oneshot(get("/jobs", Some(&secret))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn inactive_user_is_forbidden() {
    let h = harness().await;
    let (user, secret) = seed_user(&h.store, "Alice", "alice@example.com").await;
    h.store.set_user_active(&user.id, false).await.unwrap();

    let response = h.app.oneshot(get("/jobs", Some(&secret))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn auth_records_key_usage() {
    let h = harness().await;
    let (user, secret) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let response = h.app.oneshot(get("/jobs", Some(&secret))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let keys = h.store.list_api_keys(Some(&user.id)).await.unwrap();
    assert!(keys[0].last_used_at.is_some());
}

#[tokio::test]
async fn submit_async_queues_an_owned_job() {
    let h = harness().await;
    let (user, secret) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let payload = b"PK\x03\x04fake-zip-bytes";
    let response = h
        .app
        .oneshot(multipart_upload("/submit-async", &secret, "file", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = h.store.get_job(&job_id, None).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.user_id, user.id);

    // The upload landed in the spool, byte for byte.
    let stash = job.zip_file_path.unwrap();
    assert!(stash.starts_with(&*h.spool.to_string_lossy()));
    assert_eq!(std::fs::read(&stash).unwrap(), payload);
}

#[tokio::test]
async fn submit_without_file_field_is_rejected() {
    let h = harness().await;
    let (_user, secret) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let response = h
        .app
        .oneshot(multipart_upload("/submit-async", &secret, "wrong", b"data"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_listing_is_scoped_and_newest_first() {
    let h = harness().await;
    let (alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;
    let (bob, bob_key) = seed_user(&h.store, "Bob", "bob@example.com").await;

    let mut first = Job::queued(&alice.id, "/spool/1.zip");
    first.created_at = Utc::now() - chrono::Duration::seconds(60);
    let second = Job::queued(&alice.id, "/spool/2.zip");
    h.store.create_job(&first).await.unwrap();
    h.store.create_job(&second).await.unwrap();
    h.store
        .create_job(&Job::queued(&bob.id, "/spool/3.zip"))
        .await
        .unwrap();

    let response = h
        .app
        .clone()
        .oneshot(get("/jobs", Some(&alice_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let listed: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["job_id"].as_str().unwrap())
        .collect();
    assert_eq!(listed, vec![second.id.as_str(), first.id.as_str()]);

    let response = h.app.oneshot(get("/jobs", Some(&bob_key))).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn foreign_and_unknown_jobs_are_indistinguishable() {
    let h = harness().await;
    let (alice, _alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;
    let (_bob, bob_key) = seed_user(&h.store, "Bob", "bob@example.com").await;

    let job = Job::queued(&alice.id, "/spool/1.zip");
    h.store.create_job(&job).await.unwrap();

    // Bob probing Alice's job id gets the same 404 as a made-up id.
    let foreign = h
        .app
        .clone()
        .oneshot(get(&format!("/jobs/{}", job.id), Some(&bob_key)))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let unknown = h
        .app
        .clone()
        .oneshot(get("/jobs/no-such-job", Some(&bob_key)))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let foreign_stream = h
        .app
        .oneshot(get(&format!("/jobs/{}/stream", job.id), Some(&bob_key)))
        .await
        .unwrap();
    assert_eq!(foreign_stream.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owned_job_summary_is_returned() {
    let h = harness().await;
    let (alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let job = Job::queued(&alice.id, "/spool/1.zip");
    h.store.create_job(&job).await.unwrap();

    let response = h
        .app
        .oneshot(get(&format!("/jobs/{}", job.id), Some(&alice_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["job_id"], job.id.as_str());
    assert_eq!(body["status"], "queued");
    assert_eq!(body["success"], serde_json::Value::Null);
}

/// Drive a job to completed with a still-present exited container.
async fn completed_job(h: &Harness, user: &User, logs: &[&str], success: bool) -> Job {
    let job = Job::queued(&user.id, "/spool/1.zip");
    h.store.create_job(&job).await.unwrap();
    let container_id =
        h.runtime
            .add_container(&job.id, ContainerStatus::Exited, Some(if success { 0 } else { 1 }), logs);
    h.store
        .update_job_status(&job.id, JobStatus::Running, Some(Utc::now()), Some(&container_id))
        .await
        .unwrap();
    h.store
        .complete_job(&job.id, success, Utc::now())
        .await
        .unwrap();
    job
}

#[tokio::test]
async fn terminal_stream_replays_logs_from_the_beginning() {
    let h = harness().await;
    let (alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;
    let job = completed_job(&h, &alice, &["collecting...\n", "2 passed\n"], true).await;

    let response = h
        .app
        .oneshot(get(
            &format!("/jobs/{}/stream?from_beginning=true", job.id),
            Some(&alice_key),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let events = sse_events(response).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Log {
                data: "collecting...\n".into()
            },
            StreamEvent::Log {
                data: "2 passed\n".into()
            },
            StreamEvent::Complete { success: true },
        ]
    );
}

#[tokio::test]
async fn terminal_stream_without_replay_sends_only_the_verdict() {
    let h = harness().await;
    let (alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;
    let job = completed_job(&h, &alice, &["2 passed\n"], true).await;

    let response = h
        .app
        .oneshot(get(&format!("/jobs/{}/stream", job.id), Some(&alice_key)))
        .await
        .unwrap();
    let events = sse_events(response).await;

    assert_eq!(events.last(), Some(&StreamEvent::Complete { success: true }));
    assert!(events
        .iter()
        .all(|e| !matches!(e, StreamEvent::Log { data } if data.contains("passed"))));
}

#[tokio::test]
async fn failed_job_with_lost_container_replays_persisted_events() {
    let h = harness().await;
    let (alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let job = Job::queued(&alice.id, "/spool/1.zip");
    h.store.create_job(&job).await.unwrap();
    h.store
        .update_job_status(&job.id, JobStatus::Running, Some(Utc::now()), Some("gone"))
        .await
        .unwrap();
    h.store
        .fail_job(&job.id, "Container lost during execution", Utc::now())
        .await
        .unwrap();

    let response = h
        .app
        .oneshot(get(
            &format!("/jobs/{}/stream?from_beginning=true", job.id),
            Some(&alice_key),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(response).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Log {
                data: "Container lost during execution".into()
            },
            StreamEvent::Complete { success: false },
        ]
    );
}

#[tokio::test]
async fn stream_of_a_stuck_queued_job_times_out() {
    let h = harness().await;
    let (alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;

    let job = Job::queued(&alice.id, "/spool/1.zip");
    h.store.create_job(&job).await.unwrap();

    let response = h
        .app
        .oneshot(get(&format!("/jobs/{}/stream", job.id), Some(&alice_key)))
        .await
        .unwrap();
    let events = sse_events(response).await;

    assert_eq!(events.last(), Some(&StreamEvent::Complete { success: false }));
    assert!(events.iter().any(
        |e| matches!(e, StreamEvent::Log { data } if data.contains("Timed out waiting"))
    ));
}

#[tokio::test]
async fn streaming_submit_announces_the_job_id_first() {
    let h = harness().await;
    let (_alice, alice_key) = seed_user(&h.store, "Alice", "alice@example.com").await;

    // No controller is running, so the stream ends with the queue timeout;
    // the job id must still arrive first.
    let response = h
        .app
        .clone()
        .oneshot(multipart_upload("/submit-stream", &alice_key, "file", b"zipbytes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let events = sse_events(response).await;
    let StreamEvent::JobId { job_id } = &events[0] else {
        panic!("first event was {:?}", events[0]);
    };
    assert!(h.store.get_job(job_id, None).await.unwrap().is_some());
    assert_eq!(events.last(), Some(&StreamEvent::Complete { success: false }));
}
