use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod protocol;

use config::Config;
use dbus_interface::{AppState, FaceGateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        recognize_threshold = config.recognize_threshold,
        duplicate_threshold = config.duplicate_threshold,
        embedding_dim = config.embedding_dim,
        ear_threshold = config.ear_threshold,
        blink_cooldown_ms = config.blink_cooldown_ms,
        "configuration loaded"
    );

    let session_bus = config.session_bus;
    let service = FaceGateService {
        state: Arc::new(AppState::new(config)),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to acquire D-Bus name {BUS_NAME}"))?;

    tracing::info!(
        bus = if session_bus { "session" } else { "system" },
        name = BUS_NAME,
        "facegated ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
