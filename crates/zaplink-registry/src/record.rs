// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance record model and write payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One registered WhatsApp instance.
///
/// The persisted `connection_state` is the unified state string produced by
/// the reconciler's status normalizer, plus the transitional creation-time
/// values `"vps_pending"` and `"initializing"` written before the worker
/// fleet has acknowledged the session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstanceRecord {
    /// Registry key.
    pub id: Uuid,
    /// Tenant the instance belongs to.
    pub tenant_id: String,
    /// Session identifier on the worker fleet, if bound.
    pub worker_instance_id: Option<String>,
    /// Human-readable instance name.
    pub name: String,
    /// Last persisted connection state.
    pub connection_state: String,
    /// Phone number, set once on first successful connection.
    pub phone: Option<String>,
    /// WhatsApp profile name, set once.
    pub profile_name: Option<String>,
    /// Reference to the profile picture, set once.
    pub profile_picture_ref: Option<String>,
    /// When `connection_state` last changed.
    pub last_state_change_at: Option<DateTime<Utc>>,
    /// When the instance last entered a connected state.
    pub date_connected: Option<DateTime<Utc>>,
    /// When the instance last left a connected state.
    pub date_disconnected: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a new record.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Tenant the instance belongs to.
    pub tenant_id: String,
    /// Human-readable instance name.
    pub name: String,
    /// Worker-fleet session id, when already known.
    pub worker_instance_id: Option<String>,
    /// Initial connection state (typically `"vps_pending"`).
    pub connection_state: String,
}

/// Payload for a connection-state update.
///
/// Optional fields are offered values: the registry only writes them into
/// columns that are currently null.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    /// New unified connection state.
    pub connection_state: String,
    /// Phone number reported alongside the status, if any.
    pub phone: Option<String>,
    /// Profile name reported alongside the status, if any.
    pub profile_name: Option<String>,
    /// Profile picture reference reported alongside the status, if any.
    pub profile_picture_ref: Option<String>,
}

impl StatusPatch {
    /// Patch carrying only a state change.
    pub fn state(connection_state: impl Into<String>) -> Self {
        Self {
            connection_state: connection_state.into(),
            ..Self::default()
        }
    }
}

/// Payload for adopting a worker-fleet session into the registry.
#[derive(Debug, Clone)]
pub struct AdoptInstance {
    /// Tenant that adopts the session.
    pub tenant_id: String,
    /// Human-supplied instance name. Adoption is never automatic.
    pub name: String,
    /// Worker-fleet session id being adopted.
    pub worker_instance_id: String,
    /// Unified connection state observed on the fleet.
    pub connection_state: String,
    /// Phone reported by the fleet, if any.
    pub phone: Option<String>,
    /// Profile name reported by the fleet, if any.
    pub profile_name: Option<String>,
}
