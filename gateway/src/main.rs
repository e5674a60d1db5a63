use anyhow::{Context, Result};
use arena_feed::FeedClient;
use clap::Parser;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use turret_control::{HardwareContext, MotionCoordinator, ZeroCalibrationStore};

mod config;
mod error;
mod routes;

use config::Config;
use routes::AppState;

const DEFAULT_FILTER: &str = "turret_gateway=debug,turret_control=debug,arena_feed=info,info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate().map_err(anyhow::Error::msg)?;

    let hardware = HardwareContext::simulated(&config.stepper_config(), config.epsilon_deg)
        .context("turret hardware initialization failed")?;
    let feed = FeedClient::new(config.feed_config())?;
    let calibration = ZeroCalibrationStore::new(&config.zero_file);

    let zero = calibration.load();
    info!("   Zero calibration {:?}: phi0={:.3} z0={:.3}", calibration.path(), zero.phi0, zero.z0);
    if !config.fixture.exists() {
        warn!("   Arena fixture {:?} missing, /positions.json will return 404", config.fixture);
    }

    let state = AppState {
        motion: Arc::new(MotionCoordinator::new(hardware, feed, calibration)),
    };

    let app = routes::router(state, &config.fixture)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.addr();
    info!("Turret gateway starting on {}", addr);
    info!("   Feed timeout: {}s, epsilon: {}°", config.feed_timeout_secs, config.epsilon_deg);

    let shutdown = shutdown_signal().context("failed to install signal handlers")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    // The router (and with it the hardware context) is gone: every axis is released
    info!("Turret gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
///
/// Handlers are installed before this returns, so a signal that arrives
/// while the server is still starting is not lost.
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl-C, draining requests"),
            _ = terminate => info!("Received SIGTERM, draining requests"),
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let shutdown = tokio::spawn(shutdown_signal().unwrap());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown future did not resolve")
            .unwrap();
    }
}
