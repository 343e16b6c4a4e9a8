// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL registry backend.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{RegistryError, Result};
use crate::record::{AdoptInstance, InstanceRecord, NewInstance, StatusPatch};
use crate::{Registry, is_connected_state};

/// sqlx/PostgreSQL-backed registry.
#[derive(Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Create a registry backed by the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the registry schema idempotently.
    ///
    /// The schema lives in `schema.sql` next to this crate and only uses
    /// `IF NOT EXISTS` statements, so it is safe to run on every startup.
    pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
        sqlx::raw_sql(include_str!("../schema.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Registry for PostgresRegistry {
    async fn get(&self, id: Uuid) -> Result<Option<InstanceRecord>> {
        let record =
            sqlx::query_as::<_, InstanceRecord>("SELECT * FROM instances WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn get_by_worker_id(
        &self,
        worker_instance_id: &str,
    ) -> Result<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            "SELECT * FROM instances WHERE worker_instance_id = $1",
        )
        .bind(worker_instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<InstanceRecord>> {
        let records = match tenant_id {
            Some(tenant) => {
                sqlx::query_as::<_, InstanceRecord>(
                    "SELECT * FROM instances WHERE tenant_id = $1 ORDER BY created_at",
                )
                .bind(tenant)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, InstanceRecord>("SELECT * FROM instances ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    async fn list_by_states(&self, states: &[&str]) -> Result<Vec<InstanceRecord>> {
        let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        let records = sqlx::query_as::<_, InstanceRecord>(
            "SELECT * FROM instances WHERE connection_state = ANY($1) ORDER BY created_at",
        )
        .bind(&states)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn insert(&self, new: NewInstance) -> Result<InstanceRecord> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::Invalid("instance name is empty".into()));
        }

        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            INSERT INTO instances (tenant_id, name, worker_instance_id, connection_state)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&new.tenant_id)
        .bind(&new.name)
        .bind(&new.worker_instance_id)
        .bind(&new.connection_state)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e
                && db.is_unique_violation()
            {
                return RegistryError::WorkerConflict(
                    new.worker_instance_id.clone().unwrap_or_default(),
                );
            }
            RegistryError::Database(e)
        })?;

        tracing::info!(
            instance_id = %record.id,
            tenant_id = %record.tenant_id,
            name = %record.name,
            "Registered instance"
        );

        Ok(record)
    }

    async fn apply_status(&self, id: Uuid, patch: StatusPatch) -> Result<InstanceRecord> {
        // Set-once fields only fill columns that are currently null; the
        // connected/disconnected timestamps move only on edge transitions.
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            UPDATE instances SET
                phone = COALESCE(NULLIF(phone, ''), $3),
                profile_name = COALESCE(NULLIF(profile_name, ''), $4),
                profile_picture_ref = COALESCE(profile_picture_ref, $5),
                last_state_change_at = CASE
                    WHEN connection_state IS DISTINCT FROM $2 THEN NOW()
                    ELSE last_state_change_at
                END,
                date_connected = CASE
                    WHEN $2 = ANY($6) AND NOT (connection_state = ANY($6)) THEN NOW()
                    ELSE date_connected
                END,
                date_disconnected = CASE
                    WHEN NOT ($2 = ANY($6)) AND connection_state = ANY($6) THEN NOW()
                    ELSE date_disconnected
                END,
                connection_state = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&patch.connection_state)
        .bind(&patch.phone)
        .bind(&patch.profile_name)
        .bind(&patch.profile_picture_ref)
        .bind(
            crate::CONNECTED_STATES
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::NotFound(id))?;

        tracing::debug!(
            instance_id = %id,
            connection_state = %record.connection_state,
            "Applied status to registry"
        );

        Ok(record)
    }

    async fn bind_worker(&self, id: Uuid, worker_instance_id: &str) -> Result<InstanceRecord> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            UPDATE instances
            SET worker_instance_id = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(worker_instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e
                && db.is_unique_violation()
            {
                return RegistryError::WorkerConflict(worker_instance_id.to_string());
            }
            RegistryError::Database(e)
        })?
        .ok_or(RegistryError::NotFound(id))?;

        Ok(record)
    }

    async fn adopt(&self, adoption: AdoptInstance) -> Result<InstanceRecord> {
        if adoption.name.trim().is_empty() {
            return Err(RegistryError::Invalid(
                "adoption requires a human-supplied name".into(),
            ));
        }

        let connected = is_connected_state(&adoption.connection_state);

        // Concurrent adoptions of the same worker session race on the unique
        // worker_instance_id constraint; the loser binds to the winner's row.
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            INSERT INTO instances (
                tenant_id, name, worker_instance_id, connection_state,
                phone, profile_name, last_state_change_at, date_connected
            )
            VALUES ($1, $2, $3, $4, NULLIF($5, ''), $6, NOW(),
                    CASE WHEN $7 THEN NOW() END)
            ON CONFLICT (worker_instance_id) DO UPDATE SET
                name = EXCLUDED.name,
                connection_state = EXCLUDED.connection_state,
                phone = COALESCE(NULLIF(instances.phone, ''), EXCLUDED.phone),
                profile_name = COALESCE(instances.profile_name, EXCLUDED.profile_name),
                last_state_change_at = NOW(),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&adoption.tenant_id)
        .bind(&adoption.name)
        .bind(&adoption.worker_instance_id)
        .bind(&adoption.connection_state)
        .bind(&adoption.phone)
        .bind(&adoption.profile_name)
        .bind(connected)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            instance_id = %record.id,
            worker_instance_id = %adoption.worker_instance_id,
            "Adopted worker session into registry"
        );

        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(instance_id = %id, "Deleted instance from registry");

        Ok(())
    }
}
