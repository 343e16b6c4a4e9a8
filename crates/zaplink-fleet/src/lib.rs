// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the zaplink worker fleet.
//!
//! The worker fleet (the "VPS pool") runs one headless WhatsApp socket per
//! session and exposes a small bearer-token-authenticated HTTP API:
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /health` | Fleet liveness and active session count |
//! | `GET /instances` | All sessions known to the fleet |
//! | `GET /instance/{id}/status` | Ground-truth status of one session |
//! | `POST /instance/create` | Provision a new session |
//! | `POST /instance/delete` | Tear down a session |
//! | `GET /instance/{id}/qr` | QR code for pairing, or a waiting marker |
//!
//! Access goes through the [`Fleet`] trait so reconciliation logic can run
//! against [`MockFleet`] in tests. Every request made by [`HttpFleet`]
//! carries a hard timeout independent of any caller-level retry policy.

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::{Fleet, FleetConfig, HttpFleet};
pub use error::{FleetError, Result};
pub use mock::MockFleet;
pub use types::{
    AckResponse, CreateSessionRequest, FleetHealth, FleetSession, QrCode, SessionList,
};
