// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fleet supervisor: resolves the vehicle roster and keeps one report
//! loop running per vehicle until shutdown.

use crate::config::Config;
use crate::db::FileCredentialStore;
use crate::error::Result;
use crate::services::credentials::CredentialManager;
use crate::services::delivery::{DeliveryQueue, DeliveryService, TraccarTransport};
use crate::services::niu::{NiuClient, TelemetrySource};
use crate::services::report_loop::{ReportLoop, ReportPolicy};
use crate::time_utils::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Wait between attempts to fetch the roster.
const ROSTER_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Wait before restarting a crashed loop.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Owns the shared components and the per-vehicle tasks.
#[derive(Clone)]
pub struct FleetSupervisor {
    credentials: Arc<CredentialManager>,
    telemetry: Arc<dyn TelemetrySource>,
    delivery: DeliveryService,
    clock: Arc<dyn Clock>,
    policy: ReportPolicy,
    /// Fixed roster from configuration; empty means ask the API.
    configured_vehicles: Vec<String>,
    roster_retry_delay: Duration,
    restart_delay: Duration,
}

impl FleetSupervisor {
    pub fn new(
        credentials: Arc<CredentialManager>,
        telemetry: Arc<dyn TelemetrySource>,
        delivery: DeliveryService,
        clock: Arc<dyn Clock>,
        policy: ReportPolicy,
        configured_vehicles: Vec<String>,
    ) -> Self {
        Self {
            credentials,
            telemetry,
            delivery,
            clock,
            policy,
            configured_vehicles,
            roster_retry_delay: ROSTER_RETRY_DELAY,
            restart_delay: RESTART_DELAY,
        }
    }

    /// Wire up the production components from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let niu = Arc::new(NiuClient::new(&config.niu_api_url, &config.niu_account_url)?);
        let store = Arc::new(FileCredentialStore::new(&config.credential_store_path));

        let credentials = Arc::new(CredentialManager::new(
            niu.clone(),
            store,
            clock.clone(),
            config.niu_account.clone(),
            config.niu_password_md5.clone(),
        ));

        let delivery = DeliveryService::new(
            Arc::new(TraccarTransport::new(&config.traccar_url)?),
            Arc::new(DeliveryQueue::new(config.retry_queue_capacity)),
            clock.clone(),
        );

        Ok(Self::new(
            credentials,
            niu,
            delivery,
            clock,
            ReportPolicy::from_config(config),
            config.vehicles.clone(),
        ))
    }

    /// Override the roster retry and crash restart delays.
    pub fn with_delays(mut self, roster_retry: Duration, restart: Duration) -> Self {
        self.roster_retry_delay = roster_retry;
        self.restart_delay = restart;
        self
    }

    /// Build the loop for one vehicle.
    pub fn report_loop(&self, vehicle_id: String) -> ReportLoop {
        ReportLoop::new(
            vehicle_id,
            self.credentials.clone(),
            self.telemetry.clone(),
            self.delivery.clone(),
            self.clock.clone(),
            self.policy.clone(),
        )
    }

    /// Resolve the roster, retrying until it is non-empty.
    ///
    /// Returns `None` if cancelled first.
    pub async fn resolve_roster(&self, cancel: &CancellationToken) -> Option<Vec<String>> {
        if !self.configured_vehicles.is_empty() {
            return Some(self.configured_vehicles.clone());
        }

        loop {
            match self.fetch_roster().await {
                Ok(vehicles) if !vehicles.is_empty() => {
                    tracing::info!(count = vehicles.len(), "Vehicle roster loaded");
                    return Some(vehicles);
                }
                Ok(_) => tracing::warn!("NIU account has no vehicles"),
                Err(e) => tracing::warn!(error = %e, "Failed to load vehicle roster"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.roster_retry_delay) => {}
            }
        }
    }

    async fn fetch_roster(&self) -> Result<Vec<String>> {
        let token = self.credentials.get().await?;
        let result = self.telemetry.list_vehicles(&token).await;
        if let Err(e) = &result {
            if e.is_token_error() {
                self.credentials.invalidate().await;
            }
        }
        result
    }

    /// Run every vehicle's loop until `cancel` fires, then wait for them
    /// to stop.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(vehicles) = self.resolve_roster(&cancel).await else {
            return;
        };

        let mut loops = JoinSet::new();
        for vehicle_id in vehicles {
            tracing::info!(vehicle_id = %vehicle_id, "Starting report loop");
            let supervisor = self.clone();
            let cancel = cancel.clone();
            loops.spawn(async move { supervisor.supervise_vehicle(vehicle_id, cancel).await });
        }

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Vehicle supervisor task failed");
            }
        }
        tracing::info!("All report loops stopped");
    }

    /// Keep one vehicle's loop alive, restarting it after a panic.
    async fn supervise_vehicle(&self, vehicle_id: String, cancel: CancellationToken) {
        loop {
            let report_loop = self.report_loop(vehicle_id.clone());
            let handle = tokio::spawn(report_loop.run(cancel.clone()));

            match handle.await {
                Ok(()) => return,
                Err(e) if e.is_panic() => {
                    tracing::error!(
                        vehicle_id = %vehicle_id,
                        error = %e,
                        restart_in_secs = self.restart_delay.as_secs(),
                        "Report loop crashed, restarting"
                    );
                }
                Err(e) => {
                    tracing::warn!(vehicle_id = %vehicle_id, error = %e, "Report loop aborted");
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.restart_delay) => {}
            }
        }
    }
}
