/*
 * Main application startup logic orchestrating all services for the verse-canvas backend.
 * I'm implementing comprehensive application initialization with service wiring, the scheduler driver, and graceful shutdown handling.
 */

use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verse_canvas::{routes, AppError, AppState, Config, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is a development convenience; absence is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting verse-canvas backend");

    let config = Config::from_env()?;
    let addr = config.socket_addr()?;

    let app_state = AppState::new(config).await?;

    // The scheduler driver evaluates cron bindings once per minute for the
    // daily-verse, cleanup, and metrics jobs.
    let scheduler_handle = Arc::clone(&app_state.scheduler).spawn();

    let app = routes::create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        AppError::ConfigurationError(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    info!("verse-canvas backend is running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    scheduler_handle.abort();
    info!("Server shutting down gracefully");
    Ok(())
}

/// Handle graceful shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
