//! Router assembly and shared request state.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use common::JobStore;
use docker::ContainerRuntime;

use crate::{auth, handlers};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory uploaded zips are stashed in until the controller consumes them.
    pub spool_dir: PathBuf,
    /// How long a stream waits for a queued job to start running.
    pub queue_wait: Duration,
    /// Upper bound on the request body; overflow yields 413.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            spool_dir: std::env::temp_dir().join("kiln-spool"),
            queue_wait: Duration::from_secs(30),
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        runtime: Arc<dyn ContainerRuntime>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            config: Arc::new(config),
        }
    }
}

/// Everything except the liveness probe sits behind the bearer-key check.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/submit-stream", post(handlers::submit_stream))
        .route("/submit-async", post(handlers::submit_async))
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/stream", get(handlers::stream_job))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
