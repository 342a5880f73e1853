use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stackgate_ci::config::{self, PipelineConfig};
use stackgate_state::SurrealExecutionStore;
use stackgated::{build_router, AppState};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "stackgated")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "stackgate webhook daemon", long_about = None)]
struct Args {
    /// Pipeline configuration file
    #[arg(short, long, env = "STACKGATE_CONFIG", default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Listen address (overrides `[server] bind`)
    #[arg(long)]
    bind: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stackgate_core::init_tracing(args.json, level);

    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let secret = config::webhook_secret().context("webhook secret is required")?;

    let store = SurrealExecutionStore::from_env()
        .await
        .context("Failed to connect to stackgate database")?;
    let pipeline = Arc::new(config.build_pipeline(Arc::new(store)));
    let listener = config.trigger_listener(secret);
    let app = build_router(AppState::new(
        pipeline,
        listener,
        config.repository.clone(),
    ));

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let tcp = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(
        bind = %bind,
        repository = %config.repository,
        environment = %config.environment.name,
        validators = config.validators.len(),
        "stackgated listening"
    );

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    info!("stackgated stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
