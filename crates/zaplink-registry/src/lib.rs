// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Central registry of WhatsApp instance records.
//!
//! The registry is the source of truth for which instances exist, which
//! worker-fleet session each one is bound to, and the last persisted
//! connection state. The reconciliation layer mutates it through the
//! [`Registry`] trait so the backing store can be swapped without touching
//! reconciliation logic.
//!
//! Two backends are provided:
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`PostgresRegistry`] | sqlx/PostgreSQL, used in production |
//! | [`MemoryRegistry`] | in-process `HashMap`, used in tests and development |
//!
//! # Data-preserving rule
//!
//! `phone`, `profile_name` and `profile_picture_ref` are set-once fields:
//! once non-null they are never overwritten by a later status update or
//! adoption. Both backends enforce this in their update paths, which
//! protects against a worker reporting a different number during a
//! reconnection race.

#![deny(missing_docs)]

/// Error types for registry operations.
pub mod error;

/// In-memory registry backend.
pub mod memory;

/// PostgreSQL registry backend.
pub mod postgres;

/// Instance record model and write payloads.
pub mod record;

pub use error::{RegistryError, Result};
pub use memory::MemoryRegistry;
pub use postgres::PostgresRegistry;
pub use record::{AdoptInstance, InstanceRecord, NewInstance, StatusPatch};

use async_trait::async_trait;
use uuid::Uuid;

/// Storage interface for instance records.
///
/// All methods are safe to call concurrently for different instance ids;
/// callers serialize operations on a single instance by awaiting each step.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch a record by registry id.
    async fn get(&self, id: Uuid) -> Result<Option<InstanceRecord>>;

    /// Fetch a record by its worker-fleet session id.
    async fn get_by_worker_id(&self, worker_instance_id: &str)
    -> Result<Option<InstanceRecord>>;

    /// List all records, optionally scoped to one tenant.
    async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<InstanceRecord>>;

    /// List records whose persisted connection state is one of `states`.
    async fn list_by_states(&self, states: &[&str]) -> Result<Vec<InstanceRecord>>;

    /// Create a new record.
    async fn insert(&self, new: NewInstance) -> Result<InstanceRecord>;

    /// Apply a connection-state update, preserving set-once fields and
    /// maintaining `last_state_change_at` / `date_connected` /
    /// `date_disconnected`.
    async fn apply_status(&self, id: Uuid, patch: StatusPatch) -> Result<InstanceRecord>;

    /// Bind a record to a worker-fleet session id.
    async fn bind_worker(&self, id: Uuid, worker_instance_id: &str) -> Result<InstanceRecord>;

    /// Adopt a worker-fleet session: create a record bound to it, or bind to
    /// the existing record if the session is already registered.
    async fn adopt(&self, adoption: AdoptInstance) -> Result<InstanceRecord>;

    /// Delete a record.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Persisted connection states that mean the instance is live on a worker.
pub const CONNECTED_STATES: &[&str] = &["ready", "open"];

/// Whether a persisted connection state counts as connected.
pub fn is_connected_state(state: &str) -> bool {
    CONNECTED_STATES.contains(&state)
}
