//! Labforge API server binary.
//!
//! Wires the registry, the external-client adapters, and the pipeline
//! orchestrator behind the HTTP API, then serves until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use labforge::api::{build_router, AppState};
use labforge::clients::linter::HttpLinterClient;
use labforge::clients::llm::HttpLlmClient;
use labforge::clients::runner::{HttpArtifactStore, HttpRunnerClient};
use labforge::config::Config;
use labforge::pipeline::driver::Orchestrator;
use labforge::registry::LabRegistry;

/// Labforge API server — generates and validates networking labs.
#[derive(Parser)]
#[command(name = "labforge", version, about)]
struct Cli {
    /// Host address to bind to (overrides BIND_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides BIND_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Directory for rotated JSON logs; stderr-only when unset.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let _logging_guard = labforge::logging::init(cli.log_dir.as_deref())?;

    let config = Config::from_env().context("invalid configuration")?;
    let bind_host = cli.host.unwrap_or_else(|| config.bind_host.clone());
    let bind_port = cli.port.unwrap_or(config.bind_port);

    info!(
        llm = %config.llm.endpoint,
        linter = %config.linter_endpoint,
        runner = %config.runner_endpoint,
        "starting labforge server"
    );

    let registry = Arc::new(LabRegistry::new(config.limits.pending_queue_capacity));
    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        Arc::new(HttpLlmClient::new(&config.llm)),
        Arc::new(HttpLinterClient::new(&config.linter_endpoint)),
        Arc::new(HttpRunnerClient::new(&config.runner_endpoint)),
        Arc::new(HttpArtifactStore::new(&config.artifact_bucket)),
        config.limits.clone(),
    ));

    let state = Arc::new(AppState { orchestrator });
    let router = build_router(state, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(format!("{bind_host}:{bind_port}"))
        .await
        .with_context(|| format!("cannot bind {bind_host}:{bind_port}"))?;
    info!("listening on http://{bind_host}:{bind_port}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("labforge server shut down");
    Ok(())
}

/// Resolve when ctrl-c arrives. In-flight pipelines die with the
/// process; labs are in-memory only.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
    }
}
