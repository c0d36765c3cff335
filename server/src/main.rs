//! flightfeed: airline live-feed server.
//!
//! Generates flight events, applies them and pushes every change to
//! connected viewers over server-sent events.

use flightfeed_runtime::metrics::MetricsRecorder;
use flightfeed_server::{Application, Config, metrics_router};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flightfeed=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        bus = ?config.bus.kind,
        storage = ?config.storage.kind,
        topic = %config.bus.topic,
        "Configuration loaded"
    );

    let recorder = MetricsRecorder::install()?;
    let metrics_addr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port);
    let metrics_listener = TcpListener::bind(&metrics_addr).await?;
    info!(address = %metrics_addr, "Metrics endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_router(recorder)).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    Application::build(config).await?.run(shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that signal is ignored and the other
/// still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
