// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! NIU-Relay daemon
//!
//! Relays NIU scooter positions to Traccar until interrupted.

use niu_relay::{config::Config, services::FleetSupervisor};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        traccar_url = %config.traccar_url,
        report_interval_secs = config.report_interval.as_secs(),
        still_report_interval_secs = config.still_report_interval.as_secs(),
        vehicles = config.vehicles.len(),
        "Starting NIU-Relay"
    );

    let supervisor = FleetSupervisor::from_config(&config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    supervisor.run(cancel).await;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("niu_relay=debug,info"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
