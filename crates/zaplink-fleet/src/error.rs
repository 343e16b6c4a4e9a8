// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleet calls.

use thiserror::Error;

/// Errors returned by fleet operations.
///
/// The variants follow the retry taxonomy: timeouts, connection failures and
/// 5xx responses are transient and eligible for backoff; 4xx responses and
/// malformed bodies are surfaced immediately.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FleetError {
    /// The request exceeded its hard timeout.
    #[error("Request to {endpoint} timed out")]
    Timeout {
        /// Logical endpoint name.
        endpoint: String,
    },

    /// The fleet host could not be reached.
    #[error("Connection to {endpoint} failed: {source}")]
    Connect {
        /// Logical endpoint name.
        endpoint: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The fleet answered with a non-success HTTP status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        /// Logical endpoint name.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Invalid response from {endpoint}: {source}")]
    Decode {
        /// Logical endpoint name.
        endpoint: String,
        /// Underlying decode error.
        source: reqwest::Error,
    },

    /// The fleet acknowledged the request but reported a failure.
    #[error("{endpoint} rejected the request: {message}")]
    Rejected {
        /// Logical endpoint name.
        endpoint: String,
        /// Error message reported by the fleet.
        message: String,
    },
}

impl FleetError {
    /// Whether the error is worth retrying under a backoff policy.
    pub fn is_transient(&self) -> bool {
        match self {
            FleetError::Timeout { .. } | FleetError::Connect { .. } => true,
            FleetError::Status { status, .. } => *status >= 500,
            FleetError::Decode { .. } | FleetError::Rejected { .. } => false,
        }
    }
}

/// Result type using [`FleetError`].
pub type Result<T> = std::result::Result<T, FleetError>;
