//! kiln-server: the HTTP front-end.

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docker::DockerRuntime;
use server::{router, AppState, ServerConfig};
use storage::SqlStore;

#[derive(Parser, Debug)]
#[clap(name = "kiln-server")]
#[clap(about = "Kiln CI server - authenticated job submission and log streaming")]
struct Args {
    /// Path to the SQLite job store
    #[clap(long, default_value = "kiln.db", env = "KILN_DB_PATH")]
    db_path: String,

    /// Directory for stashed zip uploads
    #[clap(long, env = "KILN_SPOOL_DIR")]
    spool_dir: Option<PathBuf>,

    /// Listen address
    #[clap(long, default_value = "0.0.0.0:8000", env = "KILN_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// Prefix applied to container names; lets deployments share a host
    #[clap(long, default_value = "kiln-", env = "KILN_CONTAINER_PREFIX")]
    namespace_prefix: String,

    /// Seconds a stream waits for a queued job to start running
    #[clap(long, default_value = "30", env = "KILN_QUEUE_WAIT_SECS")]
    queue_wait_secs: u64,

    /// Maximum upload size in megabytes
    #[clap(long, default_value = "64", env = "KILN_MAX_UPLOAD_MB")]
    max_upload_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("server={0},storage={0},tower_http=warn", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Kiln server");
    tracing::info!("💾 Job store: {}", args.db_path);
    tracing::info!("📡 Listen address: {}", args.listen_addr);

    let store = Arc::new(SqlStore::connect(&args.db_path).await?);
    let runtime = Arc::new(DockerRuntime::new(
        &args.namespace_prefix,
        docker::container::DEFAULT_IMAGE,
        docker::container::DEFAULT_RUN_COMMAND,
    )?);

    let config = ServerConfig {
        spool_dir: args
            .spool_dir
            .unwrap_or_else(|| std::env::temp_dir().join("kiln-spool")),
        queue_wait: Duration::from_secs(args.queue_wait_secs),
        max_upload_bytes: args.max_upload_mb * 1024 * 1024,
    };
    tracing::info!("📥 Spool directory: {:?}", config.spool_dir);

    let app = router(AppState::new(store, runtime, config));

    let listener = tokio::net::TcpListener::bind(args.listen_addr).await?;
    tracing::info!("✅ Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
