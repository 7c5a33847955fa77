// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-vehicle polling and reporting loop.
//!
//! Each tick:
//! 1. Give the retry queue one chance to deliver a due item
//! 2. Poll the vehicle if the poll interval has elapsed
//! 3. Convert the fix to WGS-84
//! 4. Apply the still/moving throttle
//! 5. Build and deliver the report (deferring on transient failure)

use crate::config::Config;
use crate::models::ReportRecord;
use crate::services::credentials::CredentialManager;
use crate::services::datum::gcj_to_wgs;
use crate::services::delivery::{DeliveryOutcome, DeliveryService};
use crate::services::niu::{SnapshotFetch, TelemetrySource};
use crate::time_utils::Clock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Granularity of the loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a cycle that produced nothing.
pub const SKIP_PAUSE: Duration = Duration::from_secs(1);

/// Reporting-rate policy shared by every vehicle.
#[derive(Debug, Clone)]
pub struct ReportPolicy {
    pub poll_interval: Duration,
    /// km/h; strictly faster counts as moving
    pub still_speed_threshold: f64,
    pub still_report_interval: Duration,
}

impl ReportPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.report_interval,
            still_speed_threshold: config.still_speed_threshold,
            still_report_interval: config.still_report_interval,
        }
    }
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Limits reports for a stationary vehicle to one heartbeat per interval.
#[derive(Debug, Clone)]
pub struct StillThrottle {
    threshold: f64,
    interval: chrono::Duration,
    last_emit: Option<DateTime<Utc>>,
}

impl StillThrottle {
    pub fn new(threshold: f64, interval: Duration) -> Self {
        Self {
            threshold,
            interval: chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX),
            last_emit: None,
        }
    }

    /// Decide whether to report now, recording the emission if so.
    pub fn should_emit(&mut self, speed: f64, now: DateTime<Utc>) -> bool {
        let moving = speed > self.threshold;
        let heartbeat_due = self
            .last_emit
            .map_or(true, |last| now - last >= self.interval);

        if moving || heartbeat_due {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Poll interval not yet elapsed.
    Idle,
    /// No credential available this cycle.
    AuthUnavailable,
    /// The upstream rejected the token; it has been invalidated.
    Unauthorized,
    /// No snapshot, or no position in it.
    NotReady,
    /// Vehicle is still and its heartbeat is not due.
    Throttled,
    Reported(DeliveryOutcome),
}

impl TickOutcome {
    fn pause(&self) -> Duration {
        match self {
            TickOutcome::AuthUnavailable | TickOutcome::Unauthorized | TickOutcome::NotReady => {
                SKIP_PAUSE
            }
            _ => TICK_INTERVAL,
        }
    }
}

/// Relays one vehicle until cancelled.
pub struct ReportLoop {
    vehicle_id: String,
    credentials: Arc<CredentialManager>,
    telemetry: Arc<dyn TelemetrySource>,
    delivery: DeliveryService,
    clock: Arc<dyn Clock>,
    policy: ReportPolicy,
    last_poll_at: Option<DateTime<Utc>>,
    throttle: StillThrottle,
}

impl ReportLoop {
    pub fn new(
        vehicle_id: String,
        credentials: Arc<CredentialManager>,
        telemetry: Arc<dyn TelemetrySource>,
        delivery: DeliveryService,
        clock: Arc<dyn Clock>,
        policy: ReportPolicy,
    ) -> Self {
        let throttle = StillThrottle::new(policy.still_speed_threshold, policy.still_report_interval);
        Self {
            vehicle_id,
            credentials,
            telemetry,
            delivery,
            clock,
            policy,
            last_poll_at: None,
            throttle,
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Run ticks until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(vehicle_id = %self.vehicle_id, "Report loop started");

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(outcome.pause()) => {}
            }
        }

        tracing::info!(vehicle_id = %self.vehicle_id, "Report loop stopped");
    }

    /// One iteration of the loop body.
    pub async fn tick(&mut self) -> TickOutcome {
        if let Some(outcome) = self.delivery.retry_due().await {
            tracing::debug!(vehicle_id = %self.vehicle_id, ?outcome, "Serviced retry queue");
        }

        let now = self.clock.now();
        if let Some(last) = self.last_poll_at {
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < self.policy.poll_interval {
                return TickOutcome::Idle;
            }
        }
        self.last_poll_at = Some(now);

        let token = match self.credentials.get().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(vehicle_id = %self.vehicle_id, error = %e, "Poll skipped: no credential");
                return TickOutcome::AuthUnavailable;
            }
        };

        let snapshot = match self.telemetry.fetch_snapshot(&token, &self.vehicle_id).await {
            SnapshotFetch::Ready(snapshot) => snapshot,
            SnapshotFetch::NotReady => {
                tracing::debug!(vehicle_id = %self.vehicle_id, "Poll skipped: no snapshot");
                return TickOutcome::NotReady;
            }
            SnapshotFetch::Unauthorized => {
                self.credentials.invalidate().await;
                return TickOutcome::Unauthorized;
            }
        };

        let Some((lat_gcj, lon_gcj)) = snapshot.position() else {
            tracing::debug!(vehicle_id = %self.vehicle_id, "Poll skipped: no position");
            return TickOutcome::NotReady;
        };

        let (lat, lon) = gcj_to_wgs(lat_gcj, lon_gcj);

        if !self.throttle.should_emit(snapshot.speed_or_zero(), now) {
            return TickOutcome::Throttled;
        }

        let record = ReportRecord::from_snapshot(&snapshot, lat, lon, now);
        TickOutcome::Reported(self.delivery.try_deliver(record).await)
    }
}
