// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for zaplink-server.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string for the instance registry.
    pub database_url: String,
    /// HTTP bind address for the API server.
    pub bind_addr: SocketAddr,
    /// Base URL of the worker fleet API.
    pub fleet_base_url: String,
    /// Bearer token expected by the worker fleet.
    pub fleet_auth_token: String,
    /// Hard per-request timeout for fleet calls.
    pub fleet_request_timeout: Duration,
    /// Public URL workers push status webhooks to.
    pub webhook_url: String,
    /// Interval between recovery sweeps.
    pub sync_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("ZAPLINK_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("ZAPLINK_DATABASE_URL or DATABASE_URL"))?;

        let port: u16 = std::env::var("ZAPLINK_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let fleet_base_url = std::env::var("ZAPLINK_FLEET_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ZAPLINK_FLEET_URL"))?;

        let fleet_auth_token = std::env::var("ZAPLINK_FLEET_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("ZAPLINK_FLEET_TOKEN"))?;

        // Fleet calls carry a hard timeout independent of any retry policy;
        // out-of-range values are clamped to the supported 8-15s band.
        let timeout_secs: u64 = std::env::var("ZAPLINK_FLEET_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidDuration("ZAPLINK_FLEET_TIMEOUT_SECS"))?;
        let fleet_request_timeout = Duration::from_secs(timeout_secs.clamp(8, 15));

        let webhook_url = std::env::var("ZAPLINK_WEBHOOK_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{port}/webhook/status"));

        let sync_secs: u64 = std::env::var("ZAPLINK_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidDuration("ZAPLINK_SYNC_INTERVAL_SECS"))?;
        let sync_interval = Duration::from_secs(sync_secs);

        Ok(Self {
            database_url,
            bind_addr,
            fleet_base_url,
            fleet_auth_token,
            fleet_request_timeout,
            webhook_url,
            sync_interval,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A duration setting could not be parsed.
    #[error("Invalid duration in {0}")]
    InvalidDuration(&'static str),
}
