use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_search::api::{AppState, create_router};
use harvest_search::config::Config;
use harvest_search::orchestrator::SearchOrchestrator;

#[derive(Parser, Debug)]
#[command(name = "harvest-search", version, about = "Metasearch aggregation service")]
struct Cli {
    /// Address the HTTP server binds to
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        searxng = %config.searxng.api_url,
        cache = config.cache.backend.name(),
        crawl_concurrency = config.crawl.concurrency,
        "configuration loaded"
    );

    let orchestrator = Arc::new(SearchOrchestrator::from_config(&config)?);

    let shutdown = CancellationToken::new();
    let sweeper = orchestrator.cache().is_enabled().then(|| {
        Arc::clone(orchestrator.cache()).spawn_sweeper(config.cache.sweep_interval, shutdown.clone())
    });

    let state = Arc::new(AppState::new(orchestrator, &config.searxng));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    tracing::info!(addr = %cli.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
