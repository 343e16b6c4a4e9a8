// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the recovery poller against an in-memory registry and a mock
//! fleet.

use std::sync::Arc;
use std::time::Duration;

use zaplink_fleet::MockFleet;
use zaplink_reconciler::{
    CancelToken, ConnectionTracker, LoopGuard, LoopGuardConfig, ReconcileError, RecoveryPoller,
    RetryPolicy, TrackerConfig, UnifiedState,
};
use zaplink_registry::{MemoryRegistry, NewInstance, Registry};

struct Harness {
    registry: Arc<MemoryRegistry>,
    fleet: Arc<MockFleet>,
    tracker: ConnectionTracker,
    poller: RecoveryPoller,
}

fn harness(policy: RetryPolicy) -> Harness {
    let registry = Arc::new(MemoryRegistry::new());
    let fleet = Arc::new(MockFleet::new());
    let tracker = ConnectionTracker::new(TrackerConfig::default());
    let guard = LoopGuard::new(LoopGuardConfig::default());
    let poller = RecoveryPoller::new(
        registry.clone(),
        fleet.clone(),
        tracker.clone(),
        guard,
        policy,
    );
    Harness {
        registry,
        fleet,
        tracker,
        poller,
    }
}

async fn seed_instance(h: &Harness, name: &str, worker_id: &str, state: &str) -> uuid::Uuid {
    let record = h
        .registry
        .insert(NewInstance {
            tenant_id: "tenant-a".into(),
            name: name.into(),
            worker_instance_id: Some(worker_id.into()),
            connection_state: state.into(),
        })
        .await
        .unwrap();
    record.id
}

#[tokio::test(start_paused = true)]
async fn resolves_within_three_attempts_on_error_error_ready() {
    let h = harness(RetryPolicy::default());
    let id = seed_instance(&h, "sales", "w-1", "error").await;
    h.fleet.add_simple_session("w-1", "connecting");
    h.fleet.script_statuses("w-1", &["error", "error", "ready"]);

    let started = tokio::time::Instant::now();
    let resolved = h
        .poller
        .poll_until_resolved(id, &CancelToken::new())
        .await
        .unwrap();

    assert!(resolved);
    // Three attempts mean exactly two backoff sleeps (2000ms + 3000ms); a
    // fourth attempt would have pushed virtual time past 9500ms.
    assert!(started.elapsed() < Duration::from_millis(9500));

    let record = h.registry.get(id).await.unwrap().unwrap();
    assert_eq!(record.connection_state, "ready");
    let state = h.tracker.get(id).unwrap();
    assert_eq!(state.status, UnifiedState::Ready);
    assert!(state.heartbeat_active);
}

#[tokio::test(start_paused = true)]
async fn resolves_immediately_when_stored_state_changes() {
    let h = harness(RetryPolicy::default());
    let id = seed_instance(&h, "sales", "w-1", "vps_pending").await;
    h.fleet.add_simple_session("w-1", "connecting");

    let started = tokio::time::Instant::now();
    let resolved = h
        .poller
        .poll_until_resolved(id, &CancelToken::new())
        .await
        .unwrap();

    // vps_pending -> connecting is a stored-state change: success on the
    // first attempt, no backoff sleeps at all.
    assert!(resolved);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn returns_false_after_attempt_budget_is_spent() {
    let policy = RetryPolicy {
        max_attempts: 4,
        ..RetryPolicy::default()
    };
    let h = harness(policy);
    let id = seed_instance(&h, "sales", "w-1", "error").await;
    h.fleet.add_simple_session("w-1", "error");

    let resolved = h
        .poller
        .poll_until_resolved(id, &CancelToken::new())
        .await
        .unwrap();

    assert!(!resolved);
    // Never silently marked ready: the last known state stands.
    let record = h.registry.get(id).await.unwrap().unwrap();
    assert_eq!(record.connection_state, "error");
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_polling_between_attempts() {
    let h = harness(RetryPolicy::default());
    let id = seed_instance(&h, "sales", "w-1", "error").await;
    h.fleet.add_simple_session("w-1", "error");

    let cancel = CancelToken::new();
    let poll_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let h = h;
        h.poller.poll_until_resolved(id, &poll_cancel).await
    });

    // Cancel while the poller sleeps through its first backoff.
    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();

    let resolved = handle.await.unwrap().unwrap();
    assert!(!resolved);
}

#[tokio::test(start_paused = true)]
async fn missing_worker_session_aborts_without_retries() {
    let h = harness(RetryPolicy::default());
    let id = seed_instance(&h, "sales", "w-gone", "error").await;

    let started = tokio::time::Instant::now();
    let result = h.poller.poll_until_resolved(id, &CancelToken::new()).await;

    // The fleet rejects the lookup outright (not transient): no backoff.
    assert!(matches!(result, Err(ReconcileError::Fleet(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn unbound_instance_aborts_without_retries() {
    let h = harness(RetryPolicy::default());
    let record = h
        .registry
        .insert(NewInstance {
            tenant_id: "tenant-a".into(),
            name: "unbound".into(),
            worker_instance_id: None,
            connection_state: "vps_pending".into(),
        })
        .await
        .unwrap();

    let result = h
        .poller
        .poll_until_resolved(record.id, &CancelToken::new())
        .await;
    assert!(matches!(result, Err(ReconcileError::NotBound(_))));
}

#[tokio::test(start_paused = true)]
async fn sweep_isolates_per_instance_failures() {
    let h = harness(RetryPolicy::default());

    for i in 1..=5 {
        let worker_id = format!("w-{i}");
        seed_instance(&h, &format!("inst-{i}"), &worker_id, "vps_pending").await;
        h.fleet.add_simple_session(&worker_id, "ready");
    }
    // Instance 3 blows up on every status call.
    h.fleet.fail_status("w-3");

    let report = h.poller.recover_pending_instances().await.unwrap();

    assert_eq!(report.recovered, 4);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("inst-3"));

    // Instances after the failing one were still attempted and synced.
    let records = h.registry.list(None).await.unwrap();
    for record in records {
        if record.worker_instance_id.as_deref() == Some("w-3") {
            assert_eq!(record.connection_state, "vps_pending");
        } else {
            assert_eq!(record.connection_state, "ready");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn sweep_reports_empty_when_nothing_is_pending() {
    let h = harness(RetryPolicy::default());
    seed_instance(&h, "steady", "w-1", "ready").await;
    h.fleet.add_simple_session("w-1", "ready");

    let report = h.poller.recover_pending_instances().await.unwrap();
    assert_eq!(report.recovered, 0);
    assert!(report.errors.is_empty());
}
