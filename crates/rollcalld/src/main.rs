use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = rollcall_core::Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        image_dir = %config.image_dir.display(),
        ledger = %config.ledger_path.display(),
        tolerance = config.tolerance,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start capture engine")?;

    let shutdown = Arc::new(Notify::new());
    let service = dbus_interface::RollcallService::new(engine.clone(), shutdown.clone());
    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(name = dbus_interface::BUS_NAME, "rollcalld ready");

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            tracing::info!("interrupt received");
            let _ = engine.quit().await;
        }
        _ = shutdown.notified() => {}
    }
    tracing::info!("rollcalld shutting down");

    Ok(())
}
