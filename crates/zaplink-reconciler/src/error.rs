// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for reconciliation operations.

use thiserror::Error;
use uuid::Uuid;
use zaplink_fleet::FleetError;
use zaplink_registry::RegistryError;

/// Reconciliation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// The loop guard refused the call; no remote request was made.
    ///
    /// This is a hard local failure, distinguishable from any remote error:
    /// the fleet was never contacted.
    #[error("Endpoint '{endpoint}' is blocked by the loop guard")]
    LoopBlocked {
        /// Logical endpoint name that is blocked.
        endpoint: String,
    },

    /// The instance does not exist in the registry.
    #[error("Instance not found: {0}")]
    NotFound(Uuid),

    /// The instance has no worker-fleet session bound to it yet.
    #[error("Instance {0} has no worker session bound")]
    NotBound(Uuid),

    /// The orphan session disappeared from the fleet before adoption.
    #[error("Worker session '{0}' is no longer alive on the fleet")]
    OrphanGone(String),

    /// A fleet call failed.
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ReconcileError {
    /// Whether a retry under the backoff policy could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::LoopBlocked { .. } => true,
            ReconcileError::Fleet(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type using [`ReconcileError`].
pub type Result<T> = std::result::Result<T, ReconcileError>;
