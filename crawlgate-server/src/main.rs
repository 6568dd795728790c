//! # Crawlgate Server
//!
//! Admission and queue service for a multi-tenant crawler.
//!
//! ## Overview
//!
//! - **Team semaphore**: lease endpoints under `/v1/semaphore/{team_id}`
//! - **Job queue**: push, claim, complete and release under `/v1/queue`
//! - **Janitor**: background sweeps reaping expired state and fixing counter drift
//!
//! State lives in Redis when `REDIS_URL` is configured, otherwise in process
//! memory.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use crawlgate_core::metrics::spawn_health_reporter;
use crawlgate_server::{
    AppState, create_app,
    infra::config::{ConfigLoad, ConfigLoader},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "crawlgate-server")]
#[command(about = "Team admission leases and conflict-free job claims")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to a crawlgate.toml (overrides CRAWLGATE_CONFIG_PATH)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Redis URL (overrides config)
    #[arg(long)]
    redis_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one janitor pass, print the report as JSON and exit
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state = bootstrap(&cli.serve).await?;

    match cli.command {
        Some(Command::Sweep) => run_sweep(state).await,
        None => run_server(state).await,
    }
}

async fn bootstrap(args: &ServeArgs) -> anyhow::Result<AppState> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if let Some(redis_url) = args.redis_url.clone() {
        config.store.redis_url = Some(redis_url);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        warn!("{warning}");
    }

    AppState::connect(config).await
}

async fn run_sweep(state: AppState) -> anyhow::Result<()> {
    let report = state.janitor.run_once().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode janitor report")?
    );
    Ok(())
}

async fn run_server(state: AppState) -> anyhow::Result<()> {
    let config = state.config.clone();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let shutdown = CancellationToken::new();

    let janitor = state.janitor.clone();
    let janitor_token = shutdown.clone();
    let janitor_task = tokio::spawn(async move { janitor.run(janitor_token).await });

    let reporter = spawn_health_reporter(
        state.stats.clone(),
        config.gate.janitor.interval().max(Duration::from_secs(1)),
        shutdown.clone(),
    );

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("crawlgate listening on http://{}", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", err);
            }
            info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(err) = janitor_task.await {
        warn!("Janitor task ended abnormally: {}", err);
    }
    if let Err(err) = reporter.await {
        warn!("Health reporter ended abnormally: {}", err);
    }

    info!("crawlgate stopped");
    Ok(())
}
