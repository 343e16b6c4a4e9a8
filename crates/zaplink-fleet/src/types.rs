// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types for the fleet HTTP API.
//!
//! The fleet speaks camelCase JSON; field names here follow the wire format
//! via serde renames.

use serde::{Deserialize, Serialize};

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetHealth {
    /// Whether the fleet considers itself healthy.
    pub success: bool,
    /// Free-form status string.
    pub status: String,
    /// Number of sessions currently running.
    #[serde(default)]
    pub active_instances: u32,
}

/// One session as reported by `GET /instances`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSession {
    /// Session identifier on the fleet.
    pub instance_id: String,
    /// Raw status string as reported by the worker.
    pub status: String,
    /// Phone number, once the session has paired.
    #[serde(default)]
    pub phone: Option<String>,
    /// WhatsApp profile name, once known.
    #[serde(default)]
    pub profile_name: Option<String>,
    /// Company name configured on the worker, if any.
    #[serde(default)]
    pub company_name: Option<String>,
}

/// `GET /instances` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionList {
    /// Sessions known to the fleet.
    #[serde(default)]
    pub instances: Vec<FleetSession>,
}

/// `GET /instance/{id}/status` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatus {
    /// Whether the lookup succeeded.
    #[serde(default)]
    pub success: bool,
    /// Raw status string.
    #[serde(default)]
    pub status: Option<String>,
    /// Error message when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /instance/create` request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Session identifier to provision.
    pub instance_id: String,
    /// Human-readable session name.
    pub session_name: String,
    /// URL the worker should push status webhooks to.
    pub webhook_url: String,
}

/// Generic acknowledgement body for create/delete.
#[derive(Debug, Clone, Deserialize)]
pub struct AckResponse {
    /// Whether the operation was accepted.
    #[serde(default)]
    pub success: bool,
    /// Error message when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

/// QR retrieval outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrCode {
    /// Base64-encoded QR image ready for display.
    Image(String),
    /// The worker has not generated a QR code yet.
    Waiting,
}

/// `GET /instance/{id}/qr` response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub waiting: bool,
    #[serde(default)]
    pub error: Option<String>,
}
