// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Report loop ticks driven by a manual clock and scripted fakes.

use niu_relay::db::MemoryCredentialStore;
use niu_relay::services::{
    CredentialState, DeliveryOutcome, ReportLoop, ReportPolicy, SnapshotFetch, TickOutcome,
};
use niu_relay::time_utils::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;
use common::{
    credential, credential_manager, delivery_service, suzhou_snapshot, FakeAuth, FakeTelemetry,
    FakeTransport, ManualClock, T0,
};

struct Harness {
    clock: Arc<ManualClock>,
    auth: Arc<FakeAuth>,
    telemetry: Arc<FakeTelemetry>,
    transport: Arc<FakeTransport>,
    report_loop: ReportLoop,
}

fn policy() -> ReportPolicy {
    ReportPolicy {
        poll_interval: Duration::from_secs(2),
        still_speed_threshold: 0.0,
        still_report_interval: Duration::from_secs(120),
    }
}

fn harness(
    auth: FakeAuth,
    stored: Option<niu_relay::models::Credential>,
    telemetry: FakeTelemetry,
    transport: FakeTransport,
) -> Harness {
    let clock = ManualClock::at(T0);
    let auth = Arc::new(auth);
    let telemetry = Arc::new(telemetry);
    let transport = Arc::new(transport);

    let store = Arc::new(MemoryCredentialStore::new(stored));
    let credentials = credential_manager(auth.clone(), store, clock.clone());
    let delivery = delivery_service(transport.clone(), 100, clock.clone());

    let report_loop = ReportLoop::new(
        "SN-TEST".to_string(),
        credentials,
        telemetry.clone(),
        delivery,
        clock.clone(),
        policy(),
    );

    Harness {
        clock,
        auth,
        telemetry,
        transport,
        report_loop,
    }
}

fn valid_token() -> Option<niu_relay::models::Credential> {
    Some(credential("stored", T0, 3 * 3600))
}

fn field(form: &[(&'static str, String)], key: &str) -> Option<String> {
    form.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
}

#[tokio::test]
async fn test_moving_vehicle_is_reported_in_wgs84() {
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new().always(SnapshotFetch::Ready(suzhou_snapshot(15.0))),
        FakeTransport::new().reply(200),
    );

    let outcome = h.report_loop.tick().await;
    assert_eq!(outcome, TickOutcome::Reported(DeliveryOutcome::Delivered));

    let sent = h.transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let form = sent[0].to_form();
    assert_eq!(field(&form, "id").as_deref(), Some("SN-TEST"));
    assert_eq!(field(&form, "lat").as_deref(), Some("31.3021867"));
    assert_eq!(field(&form, "lon").as_deref(), Some("120.5958290"));
    assert_eq!(field(&form, "speed").as_deref(), Some("29.16"));
    assert_eq!(
        field(&form, "timestamp").as_deref(),
        Some("2023-11-14T22:13:20Z")
    );

    assert_eq!(h.auth.exchanges(), 0);
    assert_eq!(*h.telemetry.tokens_seen.lock().unwrap(), vec!["stored"]);
}

#[tokio::test]
async fn test_missing_fix_time_falls_back_to_poll_time() {
    let mut snapshot = suzhou_snapshot(15.0);
    snapshot.fix_timestamp_ms = None;
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new().always(SnapshotFetch::Ready(snapshot)),
        FakeTransport::new(),
    );
    h.clock.advance_secs(42);

    h.report_loop.tick().await;

    let sent = h.transport.sent.lock().unwrap();
    assert_eq!(sent[0].timestamp, h.clock.now());
}

#[tokio::test]
async fn test_poll_interval_is_respected() {
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new().always(SnapshotFetch::Ready(suzhou_snapshot(15.0))),
        FakeTransport::new(),
    );

    assert!(matches!(h.report_loop.tick().await, TickOutcome::Reported(_)));

    h.clock.advance_millis(1_900);
    assert_eq!(h.report_loop.tick().await, TickOutcome::Idle);
    assert_eq!(h.telemetry.poll_count(), 1);

    h.clock.advance_millis(100);
    assert!(matches!(h.report_loop.tick().await, TickOutcome::Reported(_)));
    assert_eq!(h.telemetry.poll_count(), 2);
}

#[tokio::test]
async fn test_no_credential_skips_poll() {
    let mut h = harness(
        FakeAuth::new(0),
        None,
        FakeTelemetry::new().always(SnapshotFetch::Ready(suzhou_snapshot(15.0))),
        FakeTransport::new(),
    );

    assert_eq!(h.report_loop.tick().await, TickOutcome::AuthUnavailable);
    assert_eq!(h.telemetry.poll_count(), 0);
    assert_eq!(h.transport.sent_count(), 0);
}

#[tokio::test]
async fn test_rejected_token_is_invalidated_and_renewed() {
    let auth = FakeAuth::new(0).on_refresh(credential("renewed", T0, 3 * 3600));
    let mut h = harness(
        auth,
        valid_token(),
        FakeTelemetry::new()
            .then(SnapshotFetch::Unauthorized)
            .always(SnapshotFetch::Ready(suzhou_snapshot(15.0))),
        FakeTransport::new(),
    );

    assert_eq!(h.report_loop.tick().await, TickOutcome::Unauthorized);
    assert_eq!(h.transport.sent_count(), 0);

    h.clock.advance_secs(2);
    assert_eq!(
        h.report_loop.tick().await,
        TickOutcome::Reported(DeliveryOutcome::Delivered)
    );
    assert_eq!(
        *h.telemetry.tokens_seen.lock().unwrap(),
        vec!["stored", "renewed"]
    );
    assert_eq!(h.auth.exchanges(), 1);
}

#[tokio::test]
async fn test_rejection_marks_credential_stale() {
    let clock = ManualClock::at(T0);
    let auth = Arc::new(FakeAuth::new(0));
    let store = Arc::new(MemoryCredentialStore::new(valid_token()));
    let credentials = credential_manager(auth, store, clock.clone());
    let telemetry = Arc::new(FakeTelemetry::new().then(SnapshotFetch::Unauthorized));
    let transport = Arc::new(FakeTransport::new());

    let mut report_loop = ReportLoop::new(
        "SN-TEST".to_string(),
        credentials.clone(),
        telemetry,
        delivery_service(transport, 10, clock.clone()),
        clock,
        policy(),
    );

    assert_eq!(report_loop.tick().await, TickOutcome::Unauthorized);
    assert_eq!(credentials.state().await, CredentialState::Stale);
}

#[tokio::test]
async fn test_snapshot_without_position_is_skipped() {
    let mut no_fix = suzhou_snapshot(15.0);
    no_fix.latitude = None;
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new()
            .then(SnapshotFetch::NotReady)
            .then(SnapshotFetch::Ready(no_fix)),
        FakeTransport::new(),
    );

    assert_eq!(h.report_loop.tick().await, TickOutcome::NotReady);
    h.clock.advance_secs(2);
    assert_eq!(h.report_loop.tick().await, TickOutcome::NotReady);
    assert_eq!(h.transport.sent_count(), 0);
}

#[tokio::test]
async fn test_still_vehicle_reports_heartbeat_only() {
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new().always(SnapshotFetch::Ready(suzhou_snapshot(0.0))),
        FakeTransport::new(),
    );

    let mut reported = 0;
    let mut throttled = 0;
    // Ten minutes of 2 second polls.
    for _ in 0..300 {
        match h.report_loop.tick().await {
            TickOutcome::Reported(_) => reported += 1,
            TickOutcome::Throttled => throttled += 1,
            other => panic!("unexpected tick outcome {:?}", other),
        }
        h.clock.advance_secs(2);
    }

    assert_eq!(reported, 5);
    assert_eq!(throttled, 295);
    assert_eq!(h.transport.sent_count(), 5);
}

#[tokio::test]
async fn test_deferred_report_is_retried_on_later_tick() {
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new().always(SnapshotFetch::Ready(suzhou_snapshot(15.0))),
        FakeTransport::new().reply(503),
    );

    assert_eq!(
        h.report_loop.tick().await,
        TickOutcome::Reported(DeliveryOutcome::Deferred)
    );

    // Retry becomes due before the next poll.
    h.clock.advance_secs(1);
    assert_eq!(h.report_loop.tick().await, TickOutcome::Idle);
    assert_eq!(h.transport.sent_count(), 2);
    assert_eq!(h.telemetry.poll_count(), 1);
}

#[tokio::test]
async fn test_one_retry_per_tick() {
    let mut h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new(),
        FakeTransport::new().reply(503).reply(503).reply(503),
    );

    // Park three reports for the same retry time.
    let snapshot = suzhou_snapshot(15.0);
    let now = h.clock.now();
    let delivery = delivery_service(h.transport.clone(), 100, h.clock.clone());
    for _ in 0..3 {
        let record = niu_relay::models::ReportRecord::from_snapshot(&snapshot, 31.3, 120.6, now);
        delivery.try_deliver(record).await;
    }
    assert_eq!(delivery.queue().len(), 3);

    let mut report_loop = ReportLoop::new(
        "SN-TEST".to_string(),
        credential_manager(
            h.auth.clone(),
            Arc::new(MemoryCredentialStore::new(valid_token())),
            h.clock.clone(),
        ),
        h.telemetry.clone(),
        delivery.clone(),
        h.clock.clone(),
        policy(),
    );

    h.clock.advance_secs(1);
    for remaining in [2, 1, 0] {
        report_loop.tick().await;
        assert_eq!(delivery.queue().len(), remaining);
    }
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let h = harness(
        FakeAuth::new(0),
        valid_token(),
        FakeTelemetry::new().always(SnapshotFetch::Ready(suzhou_snapshot(15.0))),
        FakeTransport::new(),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(h.report_loop.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();

    // The manual clock never advanced, so only the first tick polled.
    assert_eq!(h.telemetry.poll_count(), 1);
    assert_eq!(h.transport.sent_count(), 1);
}
