//! kiln-controller: the singleton reconciliation process.

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use controller::{Controller, ControllerConfig};
use docker::DockerRuntime;
use storage::SqlStore;

#[derive(Parser, Debug)]
#[clap(name = "kiln-controller")]
#[clap(about = "Kiln CI controller - reconciles job state with the container runtime")]
struct Args {
    /// Path to the SQLite job store
    #[clap(long, default_value = "kiln.db", env = "KILN_DB_PATH")]
    db_path: String,

    /// Root directory for per-job scratch workspaces
    #[clap(long, env = "KILN_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Prefix applied to container names; lets deployments share a host
    #[clap(long, default_value = "kiln-", env = "KILN_CONTAINER_PREFIX")]
    namespace_prefix: String,

    /// Seconds between reconciliation passes
    #[clap(long, default_value = "2.0", env = "KILN_RECONCILE_SECS")]
    reconcile_interval_secs: f64,

    /// Upper bound in seconds for any single container operation
    #[clap(long, default_value = "30", env = "KILN_OP_TIMEOUT_SECS")]
    op_timeout_secs: u64,

    /// Image the test command runs in
    #[clap(long, default_value = docker::container::DEFAULT_IMAGE, env = "KILN_IMAGE")]
    image: String,

    /// Command executed inside the container
    #[clap(long, default_value = docker::container::DEFAULT_RUN_COMMAND, env = "KILN_RUN_COMMAND")]
    run_command: String,

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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("controller={0},docker={0},storage={0}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Kiln controller");
    tracing::info!("💾 Job store: {}", args.db_path);
    tracing::info!("📦 Container namespace: {}", args.namespace_prefix);

    let store = Arc::new(SqlStore::connect(&args.db_path).await?);
    let runtime = Arc::new(DockerRuntime::new(
        &args.namespace_prefix,
        &args.image,
        &args.run_command,
    )?);

    let config = ControllerConfig {
        reconcile_interval: Duration::from_secs_f64(args.reconcile_interval_secs),
        op_timeout: Duration::from_secs(args.op_timeout_secs),
        scratch_dir: args
            .scratch_dir
            .unwrap_or_else(|| std::env::temp_dir().join("kiln-scratch")),
    };
    let controller = Controller::new(store, runtime, config);

    tracing::info!("✅ Controller initialized, entering reconciliation loop");

    tokio::select! {
        _ = controller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping controller");
        }
    }

    tracing::info!("Controller stopped");
    Ok(())
}
