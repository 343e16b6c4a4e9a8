// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zaplink Server - reconciliation API and background workers.
//!
//! This crate wires the reconciliation layer to the outside world:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      CRM UI / API clients                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │ HTTP
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    zaplink-server (this crate)                  │
//! │  ┌────────────┐  ┌─────────────┐  ┌────────────┐  ┌──────────┐  │
//! │  │  axum API  │  │   webhook   │  │ SyncWorker │  │  Sweep   │  │
//! │  │  handlers  │  │  ingestion  │  │  (2 min)   │  │  Worker  │  │
//! │  └────────────┘  └─────────────┘  └────────────┘  └──────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌───────────────────┐              ┌─────────────────────────┐
//! │    PostgreSQL     │              │      worker fleet       │
//! │ instance registry │              │ (WhatsApp socket hosts) │
//! └───────────────────┘              └─────────────────────────┘
//! ```
//!
//! # HTTP API
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /instances` | Create an instance and provision a fleet session |
//! | `GET /instances` | List registry records |
//! | `DELETE /instances/{id}` | Delete a session and its record |
//! | `GET /instances/{id}/status` | Cached or persisted status of one instance |
//! | `POST /instances/{id}/status` | Feed a status observation |
//! | `GET /instances/status` | Cached status of all instances |
//! | `GET /instances/{id}/should-retry` | Retry-eligibility decision |
//! | `POST /instances/{id}/poll` | Poll one instance until its status resolves |
//! | `GET /instances/{id}/qr` | Pairing QR code (proxied from the fleet) |
//! | `POST /sync` | Manual recovery sweep |
//! | `GET /orphans` | Fleet sessions with no registry record |
//! | `POST /orphans/adopt` | Adopt an orphan session |
//! | `GET /health-check` | Bidirectional registry/fleet diagnosis |
//! | `POST /webhook/status` | Status webhook ingestion from workers |
//! | `GET /healthz` | Process liveness |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ZAPLINK_DATABASE_URL` | Yes* | - | PostgreSQL connection string |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `ZAPLINK_PORT` | No | `8080` | HTTP port |
//! | `ZAPLINK_FLEET_URL` | Yes | - | Worker fleet base URL |
//! | `ZAPLINK_FLEET_TOKEN` | Yes | - | Worker fleet bearer token |
//! | `ZAPLINK_FLEET_TIMEOUT_SECS` | No | `10` | Fleet request timeout (clamped 8-15) |
//! | `ZAPLINK_WEBHOOK_URL` | No | derived | Public webhook URL for workers |
//! | `ZAPLINK_SYNC_INTERVAL_SECS` | No | `120` | Recovery sweep interval |

/// Server configuration loaded from environment variables.
pub mod config;

/// HTTP handlers and router.
pub mod handlers;

/// Embeddable runtime composing the subsystem.
pub mod runtime;

/// Background worker that purges idle loop-guard endpoints.
pub mod sweep_worker;

/// Background worker for periodic recovery sweeps.
pub mod sync_worker;

pub use config::Config;
pub use runtime::ZaplinkRuntime;
