// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL registry backend.
//!
//! These run against a real database and are skipped unless
//! `TEST_DATABASE_URL` is set.

use sqlx::PgPool;
use zaplink_registry::{
    AdoptInstance, NewInstance, PostgresRegistry, Registry, RegistryError, StatusPatch,
};

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    PostgresRegistry::ensure_schema(&pool).await.ok()?;
    Some(pool)
}

fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_insert_apply_status_and_phone_preservation() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let registry = PostgresRegistry::new(pool);

    let record = registry
        .insert(NewInstance {
            tenant_id: "test-tenant".into(),
            name: unique_name("pg"),
            worker_instance_id: None,
            connection_state: "vps_pending".into(),
        })
        .await
        .unwrap();
    assert_eq!(record.connection_state, "vps_pending");
    assert!(record.phone.is_none());

    let updated = registry
        .apply_status(
            record.id,
            StatusPatch {
                connection_state: "ready".into(),
                phone: Some("5511999990000".into()),
                ..StatusPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.connection_state, "ready");
    assert_eq!(updated.phone.as_deref(), Some("5511999990000"));
    assert!(updated.date_connected.is_some());

    let updated = registry
        .apply_status(
            record.id,
            StatusPatch {
                connection_state: "disconnected".into(),
                phone: Some("5511000000000".into()),
                ..StatusPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.phone.as_deref(), Some("5511999990000"));
    assert!(updated.date_disconnected.is_some());

    registry.delete(record.id).await.unwrap();
}

#[tokio::test]
async fn test_adopt_conflict_binds_to_existing_row() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let registry = PostgresRegistry::new(pool);

    let worker_id = unique_name("w");
    let adoption = AdoptInstance {
        tenant_id: "test-tenant".into(),
        name: unique_name("adopted"),
        worker_instance_id: worker_id.clone(),
        connection_state: "ready".into(),
        phone: Some("5511999990000".into()),
        profile_name: None,
    };

    let first = registry.adopt(adoption.clone()).await.unwrap();
    let second = registry
        .adopt(AdoptInstance {
            name: unique_name("adopted-again"),
            phone: Some("5511777770000".into()),
            ..adoption
        })
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.phone.as_deref(), Some("5511999990000"));

    registry.delete(first.id).await.unwrap();
}

#[tokio::test]
async fn test_bind_worker_rejects_duplicates() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let registry = PostgresRegistry::new(pool);

    let worker_id = unique_name("w");
    let a = registry
        .insert(NewInstance {
            tenant_id: "test-tenant".into(),
            name: unique_name("a"),
            worker_instance_id: Some(worker_id.clone()),
            connection_state: "vps_pending".into(),
        })
        .await
        .unwrap();
    let b = registry
        .insert(NewInstance {
            tenant_id: "test-tenant".into(),
            name: unique_name("b"),
            worker_instance_id: None,
            connection_state: "vps_pending".into(),
        })
        .await
        .unwrap();

    let result = registry.bind_worker(b.id, &worker_id).await;
    assert!(matches!(result, Err(RegistryError::WorkerConflict(_))));

    registry.delete(a.id).await.unwrap();
    registry.delete(b.id).await.unwrap();
}
