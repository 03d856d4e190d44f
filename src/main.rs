//! armwatch - SO-101 arm telemetry and camera dashboard
//!
//! Main entry point.

use armwatch::{
    camera::FfmpegConnector,
    motor_bus::FeetechConnector,
    port_probe::find_available_port,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "armwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting armwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        leader_port = config.leader_port.as_deref().unwrap_or("-"),
        follower_port = config.follower_port.as_deref().unwrap_or("-"),
        host = %config.host,
        port = config.port,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Configuration loaded"
    );

    // Port first: no free port means nothing else is worth starting
    let (port, std_listener) =
        find_available_port(&config.host, config.port, config.port_attempts)?;
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    let state = AppState::new(
        config,
        Arc::new(FeetechConnector::default()),
        Arc::new(FfmpegConnector::default()),
    );

    // Initial connect, then background loops
    let report = state.orchestrator.reconnect().await;
    tracing::info!(status = %report.status, "Initial arm connect done");

    let arms = state.config.configured_arms();
    if arms.is_empty() {
        tracing::warn!("No arm ports configured (LEADER_ARM_PORT / FOLLOWER_ARM_PORT)");
    }
    state.poller.start(&arms).await;
    state.publisher.start().await;

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}:{}", state.config.host, port);

    let viewers = state.viewers.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open MJPEG streams would otherwise hold the drain forever
            viewers.shutdown();
        })
        .await?;

    state.poller.stop().await;
    state.publisher.stop().await;
    state.orchestrator.shutdown().await;
    tracing::info!("armwatch stopped");

    Ok(())
}
