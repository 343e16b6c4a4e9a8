// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for orphan discovery, adoption, and the health check.

use std::sync::Arc;

use zaplink_fleet::{FleetSession, MockFleet};
use zaplink_reconciler::{
    LoopGuard, LoopGuardConfig, OrphanCandidate, OrphanReconciler, ReconcileError,
};
use zaplink_registry::{MemoryRegistry, NewInstance, Registry, StatusPatch};

fn setup() -> (Arc<MemoryRegistry>, Arc<MockFleet>, OrphanReconciler) {
    let registry = Arc::new(MemoryRegistry::new());
    let fleet = Arc::new(MockFleet::new());
    let reconciler = OrphanReconciler::new(
        registry.clone(),
        fleet.clone(),
        LoopGuard::new(LoopGuardConfig::default()),
    );
    (registry, fleet, reconciler)
}

async fn seed_bound_instance(registry: &MemoryRegistry, name: &str, worker_id: &str) {
    registry
        .insert(NewInstance {
            tenant_id: "tenant-a".into(),
            name: name.into(),
            worker_instance_id: Some(worker_id.into()),
            connection_state: "ready".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn scan_returns_only_unregistered_sessions() {
    let (registry, fleet, reconciler) = setup();

    seed_bound_instance(&registry, "known", "w-known").await;
    fleet.add_simple_session("w-known", "open");
    fleet.add_session(FleetSession {
        instance_id: "w-orphan".into(),
        status: "open".into(),
        phone: Some("5511999990000".into()),
        profile_name: Some("Suporte".into()),
        company_name: None,
    });

    let orphans = reconciler.scan_for_orphans().await.unwrap();

    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].worker_instance_id, "w-orphan");
    assert_eq!(orphans[0].phone.as_deref(), Some("5511999990000"));
}

#[tokio::test]
async fn scan_is_empty_when_everything_is_registered() {
    let (registry, fleet, reconciler) = setup();

    seed_bound_instance(&registry, "a", "w-1").await;
    fleet.add_simple_session("w-1", "open");

    let orphans = reconciler.scan_for_orphans().await.unwrap();
    assert!(orphans.is_empty());
}

#[tokio::test]
async fn adopt_creates_a_bound_record_with_metadata() {
    let (registry, fleet, reconciler) = setup();

    fleet.add_session(FleetSession {
        instance_id: "w-orphan".into(),
        status: "open".into(),
        phone: Some("5511999990000".into()),
        profile_name: Some("Suporte".into()),
        company_name: None,
    });

    let orphans = reconciler.scan_for_orphans().await.unwrap();
    let record = reconciler
        .adopt_orphan(&orphans[0], "recovered-main", "tenant-a")
        .await
        .unwrap();

    assert_eq!(record.name, "recovered-main");
    assert_eq!(record.worker_instance_id.as_deref(), Some("w-orphan"));
    // "open" normalizes to the connected state.
    assert_eq!(record.connection_state, "ready");
    assert_eq!(record.phone.as_deref(), Some("5511999990000"));
    assert!(record.date_connected.is_some());

    // The adopted session is no longer an orphan.
    let orphans = reconciler.scan_for_orphans().await.unwrap();
    assert!(orphans.is_empty());
}

#[tokio::test]
async fn adopt_never_overwrites_an_existing_phone() {
    let (registry, fleet, reconciler) = setup();

    seed_bound_instance(&registry, "existing", "w-1").await;
    let existing = registry.get_by_worker_id("w-1").await.unwrap().unwrap();
    registry
        .apply_status(
            existing.id,
            StatusPatch {
                connection_state: "ready".into(),
                phone: Some("5511999990000".into()),
                ..StatusPatch::default()
            },
        )
        .await
        .unwrap();

    fleet.add_session(FleetSession {
        instance_id: "w-1".into(),
        status: "open".into(),
        phone: Some("5511000000000".into()),
        profile_name: None,
        company_name: None,
    });

    let candidate = OrphanCandidate {
        worker_instance_id: "w-1".into(),
        status: "open".into(),
        phone: Some("5511000000000".into()),
        profile_name: None,
        company_name: None,
    };
    let record = reconciler
        .adopt_orphan(&candidate, "rebound", "tenant-a")
        .await
        .unwrap();

    // Bound to the existing row; the original phone survives the race.
    assert_eq!(record.id, existing.id);
    assert_eq!(record.phone.as_deref(), Some("5511999990000"));
}

#[tokio::test]
async fn adopt_rejects_sessions_gone_from_the_fleet() {
    let (_registry, _fleet, reconciler) = setup();

    let candidate = OrphanCandidate {
        worker_instance_id: "w-vanished".into(),
        status: "open".into(),
        phone: None,
        profile_name: None,
        company_name: None,
    };
    let result = reconciler
        .adopt_orphan(&candidate, "ghost", "tenant-a")
        .await;

    assert!(matches!(result, Err(ReconcileError::OrphanGone(_))));
}

#[tokio::test]
async fn adopt_by_worker_id_requires_a_listed_session() {
    let (_registry, fleet, reconciler) = setup();
    fleet.add_simple_session("w-1", "open");

    let record = reconciler
        .adopt_by_worker_id("w-1", "picked-up", "tenant-a")
        .await
        .unwrap();
    assert_eq!(record.worker_instance_id.as_deref(), Some("w-1"));

    let missing = reconciler
        .adopt_by_worker_id("w-unknown", "nope", "tenant-a")
        .await;
    assert!(matches!(missing, Err(ReconcileError::OrphanGone(_))));
}

#[tokio::test]
async fn health_check_reports_both_directions() {
    let (registry, fleet, reconciler) = setup();

    // Registered and alive: consistent.
    seed_bound_instance(&registry, "steady", "w-ok").await;
    fleet.add_simple_session("w-ok", "open");
    // On the fleet only: orphan.
    fleet.add_simple_session("w-orphan", "connecting");
    // In the registry only: missing on fleet.
    seed_bound_instance(&registry, "ghost", "w-gone").await;

    let report = reconciler.perform_health_check().await.unwrap();

    assert_eq!(report.orphan_count, 1);
    assert_eq!(report.missing_count, 1);
    assert_eq!(report.inconsistencies.len(), 2);
    assert_eq!(report.recommendations.len(), 2);

    // Diagnosis only: nothing was created or deleted.
    assert_eq!(registry.list(None).await.unwrap().len(), 2);
    assert!(
        reconciler
            .scan_for_orphans()
            .await
            .unwrap()
            .iter()
            .any(|o| o.worker_instance_id == "w-orphan")
    );
}

#[tokio::test]
async fn health_check_is_clean_when_consistent() {
    let (registry, fleet, reconciler) = setup();
    seed_bound_instance(&registry, "steady", "w-1").await;
    fleet.add_simple_session("w-1", "open");

    let report = reconciler.perform_health_check().await.unwrap();
    assert_eq!(report.orphan_count, 0);
    assert_eq!(report.missing_count, 0);
    assert!(report.inconsistencies.is_empty());
    assert_eq!(report.recommendations.len(), 1);
}
