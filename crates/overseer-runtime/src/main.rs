//! # Overseer Runtime Binary
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize logging
//! 3. Wrap the demo subsystems and register them with the overseer
//! 4. Start every subsystem
//! 5. Route one call relay → pinger to show the path works
//! 6. Run until Ctrl+C, then stop everything and drain the bus

use anyhow::{Context, Result};
use overseer_bus::EventBus;
use overseer_runtime::subsystems::{Pinger, Relay};
use overseer_runtime::{Lifecycle, Overseer, RuntimeConfig, SubsystemLibrary};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env();
    config.validate().context("invalid runtime configuration")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(retry = ?config.retry, "Starting overseer runtime");

    let bus = EventBus::new();
    let overseer = Overseer::new(
        bus.clone(),
        config.retry.clone(),
        [
            Lifecycle::new(Pinger::new(bus.clone())),
            Lifecycle::new(Relay::new(bus.clone())),
        ],
    );

    if let Err(errors) = overseer.start_all().await {
        for e in &errors {
            error!(error = %e, "Subsystem failed to start");
        }
        overseer.stop_all().await;
        anyhow::bail!("{} subsystem(s) failed to start", errors.len());
    }

    let library = SubsystemLibrary::new(bus.clone(), "main");
    match library.relay().call_pinger("hello").await {
        Ok(data) => info!(?data, "relay reached pinger"),
        Err(e) => error!(error = %e, "relay could not reach pinger"),
    }

    info!("Overseer is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    overseer.stop_all().await;
    bus.wait_async().await;
    info!("Shutdown complete");

    Ok(())
}
