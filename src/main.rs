mod channel;
mod config;
mod connection;
mod delivery;
mod display;
mod link;
mod sampler;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use solarstation_shared::SECRET_ENV_VAR;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::StationConfig;
use connection::ConnectionManager;
use delivery::DeliveryWorker;
use display::LogDisplay;
use link::{HostLink, LinkDriver};
use sampler::{Sampler, SensorBus, SimulatedSensors};
use transport::TcpConnector;

#[derive(Parser, Debug)]
#[command(name = "station", about = "Solar telemetry station")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "station.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let mut config = StationConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_secret_override(std::env::var(SECRET_ENV_VAR).ok());
    config.validate().context("refusing to start")?;

    let server = config.server_addr()?;
    let auth = config.authenticator()?;

    info!("Station starting");
    info!("  Collector: {}", server);
    info!("  Wi-Fi SSID: {}", config.wifi.ssid);

    let mut link = HostLink::new(server);
    if !link
        .connect(&config.wifi.ssid, &config.wifi.password, config.wifi_timeout())
        .await
    {
        // The delivery loop keeps retrying
        warn!("Wireless link not up at startup");
    }

    let connection = ConnectionManager::new(config.connection(), Arc::new(TcpConnector::new(server)));
    let poller = connection.spawn_poller(config.poll_interval());
    connection.start();

    let (publisher, consumer) = channel::snapshot_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sampler = Sampler::new(
        SimulatedSensors::new(),
        SensorBus::new(),
        publisher,
        config.sampler(),
    );
    let sampler_task = tokio::spawn(sampler.run(shutdown_rx.clone()));

    let worker = DeliveryWorker::new(
        config.delivery(),
        link,
        LogDisplay::new(),
        connection.clone(),
        consumer,
        auth,
    );
    let delivery_task = tokio::spawn(worker.run(shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    let _ = shutdown_tx.send(true);
    for (name, task) in [("sampler", sampler_task), ("delivery", delivery_task)] {
        if let Err(e) = task.await {
            error!("{} task ended abnormally: {}", name, e);
        }
    }
    poller.abort();
    connection.close();

    info!("Station stopped");
    Ok(())
}
