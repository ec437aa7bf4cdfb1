//! Parley CLI and REST API entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, sets up tracing, then either prints the effective
//! configuration or starts the REST API server.

mod cli;
mod http;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use parley_observe::tracing_setup::{LogFormat, init_tracing, shutdown_tracing};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cli::{Cli, Commands};
use state::{AppState, load_effective_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Plain
    };
    init_tracing(cli.log_filter(), format, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Config { config } => cli::config::show_config(&config).await,

        Commands::Serve { host, port, config } => {
            let mut config = load_effective_config(&config, |key| std::env::var(key).ok()).await?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
    }
}

async fn serve(config: parley_types::config::AppConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::init(config, shutdown.clone()).await?;
    let sweeper = tokio::spawn(sweep_idle(state.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, model = %state.config.llm.model, "Parley API listening");

    let router = http::router::build_router(state.clone());
    let stop = shutdown.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown requested, cancelling in-flight requests");
        stop.cancel();
    })
    .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "sweep task ended abnormally");
    }
    state.db_pool.close().await;
    info!("server stopped");
    Ok(())
}

/// Evict idle rate-limit buckets and expired cache entries until shutdown.
async fn sweep_idle(state: AppState) {
    let limits = &state.config.rate_limit;
    let max_idle = Duration::from_secs(limits.idle_eviction_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(limits.sweep_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let buckets = state.rate_limiter.sweep_idle(max_idle);
                let entries = state.cache.purge_expired();
                if buckets > 0 || entries > 0 {
                    debug!(buckets, entries, "idle sweep");
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
