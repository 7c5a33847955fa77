// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Offline fakes for the relay's I/O seams.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use niu_relay::db::MemoryCredentialStore;
use niu_relay::error::{AppError, Result};
use niu_relay::models::{Credential, ReportRecord, VehicleSnapshot};
use niu_relay::services::delivery::HttpReply;
use niu_relay::services::{
    AuthApi, CredentialManager, DeliveryQueue, DeliveryService, ReportTransport, SnapshotFetch,
    TelemetrySource,
};
use niu_relay::time_utils::Clock;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wall-clock start for every test: 2023-11-14T22:13:20Z.
#[allow(dead_code)]
pub const T0: i64 = 1_700_000_000;

/// Clock that only moves when told to.
#[allow(dead_code)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn at(epoch_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(DateTime::from_timestamp(epoch_secs, 0).unwrap()),
        })
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.now.lock().unwrap() += Duration::seconds(secs);
    }

    pub fn advance_millis(&self, millis: i64) {
        *self.now.lock().unwrap() += Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Credential valid for `ttl_secs` from `now`.
#[allow(dead_code)]
pub fn credential(token: &str, now: i64, ttl_secs: i64) -> Credential {
    Credential {
        access_token: token.to_string(),
        refresh_token: format!("{}-refresh", token),
        access_expires_at: now + ttl_secs,
        refresh_expires_at: now + 30 * 86_400,
    }
}

/// Scripted token endpoint that counts every exchange.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeAuth {
    pub logins: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub validations: AtomicUsize,
    /// Simulated network latency for every call.
    pub latency_ms: u64,
    login_result: Mutex<Option<Credential>>,
    refresh_result: Mutex<Option<Credential>>,
    accepted_tokens: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl FakeAuth {
    pub fn new(latency_ms: u64) -> Self {
        Self {
            latency_ms,
            ..Default::default()
        }
    }

    pub fn on_login(self, credential: Credential) -> Self {
        *self.login_result.lock().unwrap() = Some(credential);
        self
    }

    pub fn on_refresh(self, credential: Credential) -> Self {
        *self.refresh_result.lock().unwrap() = Some(credential);
        self
    }

    pub fn accepting(self, token: &str) -> Self {
        self.accepted_tokens.lock().unwrap().insert(token.to_string());
        self
    }

    pub fn exchanges(&self) -> usize {
        self.logins.load(Ordering::SeqCst) + self.refreshes.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

#[async_trait]
impl AuthApi for FakeAuth {
    async fn login(&self, _account: &str, _password_md5: &str) -> Result<Credential> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.login_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::Auth("wrong password".to_string()))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Credential> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.refresh_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::Auth("refresh token revoked".to_string()))
    }

    async fn validate(&self, access_token: &str) -> Result<bool> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.accepted_tokens.lock().unwrap().contains(access_token))
    }
}

/// Telemetry source replaying scripted poll results.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeTelemetry {
    pub polls: AtomicUsize,
    pub tokens_seen: Mutex<Vec<String>>,
    script: Mutex<VecDeque<SnapshotFetch>>,
    /// Returned once the script runs out; `NotReady` if unset.
    repeat: Mutex<Option<SnapshotFetch>>,
    vehicles: Mutex<Vec<String>>,
    panics_left: AtomicUsize,
    pub roster_calls: AtomicUsize,
    roster_fails: AtomicBool,
}

#[allow(dead_code)]
impl FakeTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, fetch: SnapshotFetch) -> Self {
        self.script.lock().unwrap().push_back(fetch);
        self
    }

    pub fn always(self, fetch: SnapshotFetch) -> Self {
        *self.repeat.lock().unwrap() = Some(fetch);
        self
    }

    pub fn with_vehicles(self, vehicles: &[&str]) -> Self {
        *self.vehicles.lock().unwrap() = vehicles.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn failing_roster(self) -> Self {
        self.roster_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn panicking(self, times: usize) -> Self {
        self.panics_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySource for FakeTelemetry {
    async fn list_vehicles(&self, _access_token: &str) -> Result<Vec<String>> {
        let call = self.roster_calls.fetch_add(1, Ordering::SeqCst);
        if self.roster_fails.load(Ordering::SeqCst) && call == 0 {
            return Err(AppError::Upstream("HTTP 503: busy".to_string()));
        }
        Ok(self.vehicles.lock().unwrap().clone())
    }

    async fn fetch_snapshot(&self, access_token: &str, vehicle_id: &str) -> SnapshotFetch {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().unwrap().push(access_token.to_string());

        let panic_now = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panic_now {
            panic!("simulated crash polling {}", vehicle_id);
        }

        let next = self.script.lock().unwrap().pop_front();
        let fetch = next
            .or_else(|| self.repeat.lock().unwrap().clone())
            .unwrap_or(SnapshotFetch::NotReady);

        // Snapshots are keyed by the vehicle that was actually polled.
        match fetch {
            SnapshotFetch::Ready(mut snapshot) => {
                snapshot.vehicle_id = vehicle_id.to_string();
                SnapshotFetch::Ready(snapshot)
            }
            other => other,
        }
    }
}

/// Transport replaying scripted replies; `Ok(200)` once the script is empty.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<std::result::Result<u16, String>>>,
    pub sent: Mutex<Vec<ReportRecord>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, status: u16) -> Self {
        self.script.lock().unwrap().push_back(Ok(status));
        self
    }

    pub fn fail(self, reason: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(reason.to_string()));
        self
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.vehicle_id.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportTransport for FakeTransport {
    async fn send(&self, record: &ReportRecord) -> Result<HttpReply> {
        self.sent.lock().unwrap().push(record.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(HttpReply {
                status,
                body: format!("status {}", status),
            }),
            Some(Err(reason)) => Err(AppError::Delivery(reason)),
            None => Ok(HttpReply {
                status: 200,
                body: String::new(),
            }),
        }
    }
}

/// Snapshot of a moving, connected vehicle in Suzhou.
#[allow(dead_code)]
pub fn suzhou_snapshot(speed: f64) -> VehicleSnapshot {
    VehicleSnapshot {
        vehicle_id: "SN-TEST".to_string(),
        latitude: Some(31.3),
        longitude: Some(120.6),
        fix_timestamp_ms: Some(1_700_000_000_000),
        speed: Some(speed),
        ..Default::default()
    }
}

/// Credential manager over in-memory fakes.
#[allow(dead_code)]
pub fn credential_manager(
    auth: Arc<FakeAuth>,
    store: Arc<MemoryCredentialStore>,
    clock: Arc<ManualClock>,
) -> Arc<CredentialManager> {
    Arc::new(CredentialManager::new(
        auth,
        store,
        clock,
        "rider@example.com".to_string(),
        "5f4dcc3b5aa765d61d8327deb882cf99".to_string(),
    ))
}

/// Delivery service over a fake transport.
#[allow(dead_code)]
pub fn delivery_service(
    transport: Arc<FakeTransport>,
    capacity: usize,
    clock: Arc<ManualClock>,
) -> DeliveryService {
    DeliveryService::new(transport, Arc::new(DeliveryQueue::new(capacity)), clock)
}
