use std::net::SocketAddr;

use anyhow::Context;
use request_shield::config::load_config;
use request_shield::service;
use request_shield::utils::{self, init_logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    tracing::info!("Starting request shield...");

    let settings = load_config().context("failed to load configuration")?;
    tracing::info!("Configuration loaded successfully");

    if settings.metrics.enabled {
        let metrics_addr: SocketAddr = settings
            .metrics
            .listen_address
            .parse()
            .context("invalid metrics.listen_address")?;
        utils::metrics::init_metrics(metrics_addr)?;
    }

    let state = service::build_state(&settings).await?;
    let sweeper = service::spawn_sweeper(state.clone(), settings.blocklist.sweep_interval());
    let app = service::build_router(state, &settings.server, service::downstream_routes());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid server address")?;
    tracing::info!(address = %addr, admin = settings.admin.enabled, "HTTP server starting");

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
