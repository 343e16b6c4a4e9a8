// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status normalization.
//!
//! Workers and webhooks report connection status as free-form strings that
//! vary by worker version (`"open"`, `"qr_ready"`, `"logout"`, ...).
//! [`normalize`] folds them into one [`UnifiedState`] so the rest of the
//! subsystem never touches raw strings.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Unified connection state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedState {
    /// No live socket on any worker.
    Disconnected,
    /// A worker is bringing the socket up.
    Connecting,
    /// The socket is up and waiting for a QR scan.
    WaitingScan,
    /// Paired and connected.
    Ready,
    /// Connected with an active session (alias of ready on most workers).
    Open,
    /// The worker reported a failure.
    Error,
    /// The instance stopped sending updates while connected.
    Timeout,
    /// Deliberately taken out of rotation.
    Maintenance,
}

impl UnifiedState {
    /// The persisted string form, matching the registry's
    /// `connection_state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnifiedState::Disconnected => "disconnected",
            UnifiedState::Connecting => "connecting",
            UnifiedState::WaitingScan => "waiting_scan",
            UnifiedState::Ready => "ready",
            UnifiedState::Open => "open",
            UnifiedState::Error => "error",
            UnifiedState::Timeout => "timeout",
            UnifiedState::Maintenance => "maintenance",
        }
    }

    /// Whether the instance is live on a worker.
    pub fn is_connected(&self) -> bool {
        matches!(self, UnifiedState::Ready | UnifiedState::Open)
    }
}

impl std::fmt::Display for UnifiedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn map_raw(raw: &str) -> Option<UnifiedState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ready" | "open" | "connected" => Some(UnifiedState::Ready),
        "connecting" | "initializing" => Some(UnifiedState::Connecting),
        "waiting_scan" | "qr_ready" | "waiting_for_scan" => Some(UnifiedState::WaitingScan),
        "disconnected" | "closed" | "logout" => Some(UnifiedState::Disconnected),
        "error" | "failed" => Some(UnifiedState::Error),
        "timeout" => Some(UnifiedState::Timeout),
        "maintenance" => Some(UnifiedState::Maintenance),
        _ => None,
    }
}

/// Fold a worker-reported status and an optional webhook-reported status
/// into one [`UnifiedState`].
///
/// The webhook status wins when present and not `"unknown"`; the worker
/// status is the fallback. Unrecognized input maps to
/// [`UnifiedState::Disconnected`] with a warning. Never panics.
pub fn normalize(raw_worker_status: &str, raw_webhook_status: Option<&str>) -> UnifiedState {
    let preferred = raw_webhook_status
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("unknown"))
        .unwrap_or(raw_worker_status);

    match map_raw(preferred) {
        Some(state) => state,
        None => {
            warn!(
                raw_status = %preferred,
                "Unrecognized connection status, treating as disconnected"
            );
            UnifiedState::Disconnected
        }
    }
}
