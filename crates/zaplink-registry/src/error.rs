// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the zaplink registry.

use thiserror::Error;
use uuid::Uuid;

/// Registry errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No record with the given id exists.
    #[error("Instance not found: {0}")]
    NotFound(Uuid),

    /// A record bound to the same worker session already exists.
    #[error("Worker session already registered: {0}")]
    WorkerConflict(String),

    /// Request validation failed.
    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Result type using [`RegistryError`].
pub type Result<T> = std::result::Result<T, RegistryError>;
