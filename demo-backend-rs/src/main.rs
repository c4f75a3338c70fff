// demo-backend-rs/src/main.rs
// Demo backend - an axum service whose failures are normalized and
// forwarded to the configured telemetry collector.
//
// Environment:
// - DEMO_BACKEND_ADDR      bind address (default 0.0.0.0:8000)
// - TELEMETRY_CONFIG_FILE  optional TOML file with telemetry settings
// - TELEMETRY_*            telemetry overrides, see error_normalizer::settings

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use demo_backend::{create_router, AppState};

const DEFAULT_ADDR: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_file = env::var("TELEMETRY_CONFIG_FILE").ok().map(PathBuf::from);
    let (config, normalizer) = error_normalizer::init(config_file.as_deref())
        .context("failed to initialize telemetry")?;

    let addr: SocketAddr = env::var("DEMO_BACKEND_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("DEMO_BACKEND_ADDR is not a valid socket address")?;

    let state = AppState::new(config.app_name.clone()).context("failed to build app state")?;
    let app = create_router(Arc::new(state), Arc::new(normalizer));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(%addr, app = %config.app_name, "Demo backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Demo backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
